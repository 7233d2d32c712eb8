//! Data models for ZTE router responses

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// How a client is attached to the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    #[serde(rename = "LAN")]
    Lan,
    #[serde(rename = "WLAN")]
    Wlan,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Lan => write!(f, "LAN"),
            NetworkType::Wlan => write!(f, "WLAN"),
        }
    }
}

/// One client machine as reported by a single scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    /// Uppercased, trimmed. The only identity a device has.
    pub mac_address: String,
    pub host_name: String,
    pub ip_address: String,
    pub active: bool,
    pub icon_type: Option<String>,
    pub network_type: NetworkType,
    /// LAN port name, or the ESSID once resolved through the AP table
    pub port: Option<String>,
    pub link_time: Option<String>,
    pub connect_time: Option<String>,
}

impl DeviceRecord {
    pub const UNKNOWN_NAME: &'static str = "Unknown";

    pub fn new(network_type: NetworkType) -> Self {
        Self {
            mac_address: String::new(),
            host_name: Self::UNKNOWN_NAME.to_string(),
            ip_address: String::new(),
            active: true,
            icon_type: None,
            network_type,
            port: None,
            link_time: None,
            connect_time: None,
        }
    }
}

/// Response from `?_type=loginData&_tag=login_entry` before logging in
#[derive(Debug, Clone, Deserialize)]
pub struct SessionTokenResponse {
    #[serde(rename = "lockingTime", default, deserialize_with = "lenient_i64")]
    pub locking_time: Option<i64>,

    #[serde(rename = "sess_token", default)]
    pub sess_token: Option<String>,
}

/// Response from the credential submit
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "lockingTime", default, deserialize_with = "lenient_i64")]
    pub locking_time: Option<i64>,

    #[serde(rename = "login_need_refresh", default, deserialize_with = "lenient_i64")]
    pub login_need_refresh: Option<i64>,

    #[serde(rename = "loginErrMsg", default)]
    pub login_err_msg: Option<String>,
}

/// Firmware is inconsistent about quoting numbers
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// WAN link attributes, whatever subset the router returned
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WanStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wan_uptime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wan_connection_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wan_connection_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp_lease_remaining: Option<String>,
}

impl WanStatus {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Hardware load and uptime
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouterDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_on_time: Option<String>,
}

impl RouterDetails {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_accepts_quoted_numbers() {
        let resp: SessionTokenResponse =
            serde_json::from_str(r#"{"lockingTime":"0","sess_token":"abc"}"#).unwrap();
        assert_eq!(resp.locking_time, Some(0));
        assert_eq!(resp.sess_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_login_response_missing_fields() {
        let resp: LoginResponse = serde_json::from_str(r#"{"promptMsg":""}"#).unwrap();
        assert_eq!(resp.locking_time, None);
        assert_eq!(resp.login_need_refresh, None);
        assert!(resp.login_err_msg.is_none());
    }
}
