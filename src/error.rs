//! Error types for router communication

use thiserror::Error;

/// Everything that can go wrong while talking to the router.
///
/// Transport failures, protocol violations and authentication rejections are
/// kept apart so callers can tell "wrong password" from "router locked" from
/// "network unreachable".
#[derive(Debug, Error)]
pub enum RouterError {
    /// Connection refused, timeout, TLS failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Router answered with a non-success HTTP status
    #[error("request failed: {status} - {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    /// Unexpected root tag, missing field, malformed XML or JSON
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `IF_ERRORSTR` carried something other than a success token
    #[error("router reported error: {0}")]
    RouterReported(String),

    /// Account permanently blocked by the router
    #[error("account blocked by the router")]
    Blocked,

    /// Too many recent failures, router refuses logins for a while
    #[error("router locked, retry in {seconds} seconds")]
    Locked { seconds: i64 },

    /// Credentials rejected with no lockout active
    #[error("credentials rejected: {0}")]
    BadCredentials(String),

    /// Operation needs a session but `login` has not succeeded
    #[error("not logged in")]
    NotLoggedIn,

    /// Reboot command could not be signed
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("unsupported router model: {0}")]
    UnsupportedModel(String),
}

impl RouterError {
    /// True for lockouts and credential rejections
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            RouterError::Blocked | RouterError::Locked { .. } | RouterError::BadCredentials(_)
        )
    }
}

impl From<xmltree::ParseError> for RouterError {
    fn from(e: xmltree::ParseError) -> Self {
        RouterError::Protocol(format!("malformed XML: {}", e))
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(e: serde_json::Error) -> Self {
        RouterError::Protocol(format!("malformed JSON: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failures_are_distinguished() {
        assert!(RouterError::Blocked.is_auth_failure());
        assert!(RouterError::Locked { seconds: 30 }.is_auth_failure());
        assert!(RouterError::BadCredentials("bad password".into()).is_auth_failure());
        assert!(!RouterError::Protocol("x".into()).is_auth_failure());
        assert!(!RouterError::NotLoggedIn.is_auth_failure());
    }

    #[test]
    fn test_locked_message_carries_countdown() {
        let msg = RouterError::Locked { seconds: 30 }.to_string();
        assert!(msg.contains("30"));
    }
}
