//! Hashing and signing helpers for the router's login and command protocol

use crate::error::RouterError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `input`
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Login credential: password first, then the challenge token
pub fn login_hash(password: &str, login_token: &str) -> String {
    sha256_hex(&format!("{}{}", password, login_token))
}

/// Value for the `Check` header that authorises an administrative POST.
///
/// The router expects base64(RSA-PKCS#1 v1.5(sha256hex(payload))).
pub fn sign_command(payload: &str, key: &RsaPublicKey) -> Result<String, RouterError> {
    let digest = sha256_hex(payload);
    let cipher = key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, digest.as_bytes())
        .map_err(|e| RouterError::Signing(e.to_string()))?;
    Ok(STANDARD.encode(cipher))
}

/// Current Unix time in milliseconds, used to seed the request counter
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    #[test]
    fn test_login_hash_order() {
        // sha256("admin" + "abc")
        assert_eq!(login_hash("admin", "abc"), sha256_hex("adminabc"));
        assert_ne!(login_hash("admin", "abc"), sha256_hex("abcadmin"));
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sign_command_decrypts_to_digest() {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        let payload = "IF_ACTION=Restart&Btn_restart=&_sessionTOKEN=42";

        let signature = sign_command(payload, &public).unwrap();
        let cipher = STANDARD.decode(signature).unwrap();
        let plain = private.decrypt(Pkcs1v15Encrypt, &cipher).unwrap();

        assert_eq!(plain, sha256_hex(payload).into_bytes());
    }
}
