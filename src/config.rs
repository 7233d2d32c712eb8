//! Configuration management
//!
//! This module handles loading configuration from TOML files. Every field has
//! a default, so an empty or missing file yields a usable config for a router
//! at 192.168.1.1 with factory credentials.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `router.password`
pub const PASSWORD_ENV: &str = "ZTE_TRACKER_PASSWORD";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Router connection settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Polling behaviour
    #[serde(default)]
    pub polling: PollingConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    /// Host or host:port of the router web UI
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Model identifier, e.g. "F6640" or "H288A"
    #[serde(default = "default_model")]
    pub model: String,

    /// Talk to the router over https instead of http
    #[serde(default)]
    pub use_https: bool,

    /// Verify the router's TLS certificate (most ship self-signed ones)
    #[serde(default)]
    pub verify_ssl: bool,

    /// PEM public key overriding the embedded reboot-signing key
    #[serde(default)]
    pub public_key_file: Option<PathBuf>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            username: default_username(),
            password: default_password(),
            model: default_model(),
            use_https: false,
            verify_ssl: false,
            public_key_file: None,
        }
    }
}

impl RouterConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{}://{}", scheme, self.host.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    /// Fetch WAN link attributes on every poll
    #[serde(default = "default_true")]
    pub query_wan_status: bool,

    /// Fetch CPU/memory/uptime on every poll
    #[serde(default = "default_true")]
    pub query_router_details: bool,

    /// Announce devices the first time they are seen
    #[serde(default = "default_true")]
    pub register_new_devices: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            query_wan_status: true,
            query_router_details: true,
            register_new_devices: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Timeout for reboot-related requests in seconds
    #[serde(default = "default_reboot_timeout")]
    pub reboot_timeout: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Maximum number of attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            reboot_timeout: default_reboot_timeout(),
            connect_timeout: default_connect_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "192.168.1.1".to_string()
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "admin".to_string()
}

fn default_model() -> String {
    "F6640".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}

fn default_reboot_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `explicit`, or the first file found on the
    /// search path, or defaults if there is none
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::search()?,
        };

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            tracing::debug!("Using router password from {}", PASSWORD_ENV);
            config.router.password = password;
        }

        Ok(config)
    }

    fn search() -> Result<Self> {
        let config_paths = vec![
            PathBuf::from("config.toml"),
            PathBuf::from("zte-tracker/config.toml"),
            PathBuf::from("/etc/zte-tracker/config.toml"),
            dirs::home_dir()
                .map(|h| h.join(".config/zte-tracker/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                return Self::from_file(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.router.host, "192.168.1.1");
        assert_eq!(cfg.router.model, "F6640");
        assert_eq!(cfg.http.timeout, 10);
        assert_eq!(cfg.http.reboot_timeout, 30);
        assert!(cfg.polling.query_wan_status);
        assert!(cfg.polling.register_new_devices);
        assert_eq!(cfg.router.base_url(), "http://192.168.1.1");
    }

    #[test]
    fn test_partial_config() {
        let cfg = Config::from_toml(
            r#"
            [router]
            host = "10.0.0.1:8443"
            model = "H3600P"
            use_https = true

            [polling]
            query_wan_status = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.router.username, "admin");
        assert_eq!(cfg.router.base_url(), "https://10.0.0.1:8443");
        assert!(!cfg.polling.query_wan_status);
        assert!(cfg.polling.query_router_details);
    }
}
