//! Per-model endpoint dialects
//!
//! Firmware families differ only in which Lua scripts serve the device lists
//! and which XML containers hold them. Marketing names map onto one of two
//! canonical profiles.

use crate::error::RouterError;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use std::fmt;
use std::str::FromStr;

const F6640_KEY_PEM: &str = include_str!("../../keys/f6640.pem");
const H288A_KEY_PEM: &str = include_str!("../../keys/h288a.pem");

/// Fixed endpoint and tag names for one firmware family
#[derive(Debug, PartialEq, Eq)]
pub struct ModelProfile {
    pub lan_script: &'static str,
    pub lan_container: &'static str,
    pub wlan_script: &'static str,
    pub wlan_container: &'static str,
    pub wan_view: &'static str,
    pub wan_script: &'static str,
    pub wan_container: &'static str,
    pub details_view: &'static str,
    pub details_script: &'static str,
    reboot_key_pem: &'static str,
}

impl ModelProfile {
    /// Public key the router expects reboot commands to be signed with
    pub fn reboot_key(&self) -> Result<RsaPublicKey, RouterError> {
        RsaPublicKey::from_public_key_pem(self.reboot_key_pem)
            .map_err(|e| RouterError::Signing(format!("embedded key: {}", e)))
    }
}

static F6640_PROFILE: ModelProfile = ModelProfile {
    lan_script: "accessdev_landevs_lua.lua",
    lan_container: "OBJ_ACCESSDEV_ID",
    wlan_script: "wlan_client_stat_lua.lua",
    wlan_container: "OBJ_WLAN_AD_ID",
    wan_view: "ethWanStatus",
    wan_script: "wan_internetstatus_lua.lua",
    wan_container: "ID_WAN_COMFIG",
    details_view: "statusMgr",
    details_script: "devmgr_statusmgr_lua.lua",
    reboot_key_pem: F6640_KEY_PEM,
};

static H288A_PROFILE: ModelProfile = ModelProfile {
    lan_script: "accessdev_landevs_lua.lua",
    lan_container: "OBJ_ACCESSDEV_ID",
    wlan_script: "accessdev_ssiddev_lua.lua",
    wlan_container: "OBJ_ACCESSDEV_ID",
    wan_view: "ethWanStatus",
    wan_script: "wan_internetstatus_lua.lua",
    wan_container: "ID_WAN_COMFIG",
    details_view: "statusMgr",
    details_script: "devmgr_statusmgr_lua.lua",
    reboot_key_pem: H288A_KEY_PEM,
};

/// Every model identifier the client accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterModel {
    F6640,
    F6645P,
    H288A,
    H169A,
    H388X,
    H2640,
    H3600P,
    H6645P,
    H3640,
}

impl RouterModel {
    pub const ALL: [RouterModel; 9] = [
        RouterModel::F6640,
        RouterModel::F6645P,
        RouterModel::H288A,
        RouterModel::H169A,
        RouterModel::H388X,
        RouterModel::H2640,
        RouterModel::H3600P,
        RouterModel::H6645P,
        RouterModel::H3640,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouterModel::F6640 => "F6640",
            RouterModel::F6645P => "F6645P",
            RouterModel::H288A => "H288A",
            RouterModel::H169A => "H169A",
            RouterModel::H388X => "H388X",
            RouterModel::H2640 => "H2640",
            RouterModel::H3600P => "H3600P",
            RouterModel::H6645P => "H6645P",
            RouterModel::H3640 => "H3640",
        }
    }

    pub fn profile(&self) -> &'static ModelProfile {
        match self {
            RouterModel::F6640 | RouterModel::F6645P => &F6640_PROFILE,
            RouterModel::H288A
            | RouterModel::H169A
            | RouterModel::H388X
            | RouterModel::H2640
            | RouterModel::H3600P
            | RouterModel::H6645P
            | RouterModel::H3640 => &H288A_PROFILE,
        }
    }
}

impl fmt::Display for RouterModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouterModel {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RouterModel::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| RouterError::UnsupportedModel(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synonyms_share_profiles() {
        assert!(std::ptr::eq(
            RouterModel::F6645P.profile(),
            RouterModel::F6640.profile()
        ));
        for model in [RouterModel::H169A, RouterModel::H3600P, RouterModel::H3640] {
            assert!(std::ptr::eq(model.profile(), RouterModel::H288A.profile()));
        }
        assert_ne!(RouterModel::F6640.profile(), RouterModel::H288A.profile());
    }

    #[test]
    fn test_parse_model() {
        assert_eq!("h288a".parse::<RouterModel>().unwrap(), RouterModel::H288A);
        assert_eq!(" F6640 ".parse::<RouterModel>().unwrap(), RouterModel::F6640);
        assert!(matches!(
            "TL-WR841N".parse::<RouterModel>(),
            Err(RouterError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_every_model_round_trips_its_name() {
        for model in RouterModel::ALL {
            assert_eq!(model.as_str().parse::<RouterModel>().unwrap(), model);
        }
    }

    #[test]
    fn test_embedded_keys_load() {
        assert!(F6640_PROFILE.reboot_key().is_ok());
        assert!(H288A_PROFILE.reboot_key().is_ok());
    }
}
