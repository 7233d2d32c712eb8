//! ZTE web-management client
//!
//! Talks to the undocumented `?_type=...&_tag=...` API the router's own web
//! UI uses. Login is a challenge-response exchange:
//!
//! 1. `loginData/login_entry` (GET) hands out a session token
//! 2. `loginData/login_token` returns a challenge inside an XML root
//! 3. `loginData/login_entry` (POST) takes `sha256(password + challenge)`
//!
//! A session lives from a successful `login` until `logout`; every other
//! request refuses to run without one.

use crate::config::{HttpConfig, RouterConfig};
use crate::error::RouterError;
use crate::http::HttpClient;
use crate::models::{
    DeviceRecord, LoginResponse, NetworkType, RouterDetails, SessionTokenResponse, WanStatus,
};
use crate::parser;
use crate::router::profile::{ModelProfile, RouterModel};
use crate::router::RouterApi;
use crate::utils;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use std::path::Path;
use std::time::Duration;

const LOGIN_DATA: &str = "loginData";
const MENU_VIEW: &str = "menuView";
const MENU_DATA: &str = "menuData";

const LAN_STATUS_VIEW: &str = "localNetStatus";
const REBOOT_VIEW: &str = "rebootAndReset";
const RESTART_SCRIPT: &str = "devmgr_restartmgr_lua.lua";

pub struct ZteClient {
    base_url: String,
    host: String,
    username: String,
    password: String,
    model: RouterModel,
    profile: &'static ModelProfile,
    http_config: HttpConfig,
    verify_ssl: bool,
    reboot_key: Option<RsaPublicKey>,
    session: Option<HttpClient>,
    login_data: Option<LoginResponse>,
    guid: u64,
    status_msg: Option<String>,
}

impl ZteClient {
    pub fn new(router: &RouterConfig, http: &HttpConfig) -> Result<Self, RouterError> {
        let model: RouterModel = router.model.parse()?;
        let reboot_key = router
            .public_key_file
            .as_deref()
            .map(load_public_key)
            .transpose()?;

        Ok(Self {
            base_url: router.base_url(),
            host: router.host.clone(),
            username: router.username.clone(),
            password: router.password.clone(),
            model,
            profile: model.profile(),
            http_config: http.clone(),
            verify_ssl: router.verify_ssl,
            reboot_key,
            session: None,
            login_data: None,
            guid: utils::now_millis(),
            status_msg: None,
        })
    }

    pub fn is_logged_in(&self) -> bool {
        self.login_data.is_some()
    }

    /// Strictly increasing for the lifetime of the client
    fn next_guid(&mut self) -> u64 {
        let guid = self.guid;
        self.guid += 1;
        guid
    }

    fn endpoint(&self, kind: &str, tag: &str) -> String {
        format!(
            "{}/?_type={}&_tag={}",
            self.base_url,
            kind,
            urlencoding::encode(tag)
        )
    }

    /// Endpoint with the counter appended so nothing serves a cached reply
    fn fresh_endpoint(&mut self, kind: &str, tag: &str) -> String {
        let guid = self.next_guid();
        format!("{}&_={}", self.endpoint(kind, tag), guid)
    }

    fn session(&self) -> Result<&HttpClient, RouterError> {
        match (&self.login_data, &self.session) {
            (Some(_), Some(http)) => Ok(http),
            _ => Err(RouterError::NotLoggedIn),
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String, RouterError> {
        Ok(self.session()?.get(url).await?.text().await?)
    }

    /// Step 1: session token, refusing to go on if the router is locked
    async fn fetch_session_token(&self, http: &HttpClient) -> Result<String, RouterError> {
        let url = self.endpoint(LOGIN_DATA, "login_entry");
        let body = http.get(&url).await?.text().await?;
        let resp: SessionTokenResponse = serde_json::from_str(&body)?;

        match resp.locking_time {
            None => {
                return Err(RouterError::Protocol(
                    "session token response without lockingTime".to_string(),
                ))
            }
            Some(t) if t < 0 => return Err(RouterError::Blocked),
            Some(t) if t > 0 => return Err(RouterError::Locked { seconds: t }),
            Some(_) => {}
        }

        resp.sess_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RouterError::Protocol("no session token".to_string()))
    }

    async fn run_login(&mut self, http: &HttpClient) -> Result<LoginResponse, RouterError> {
        let session_token = self.fetch_session_token(http).await?;

        // Step 2: challenge
        let url = self.fresh_endpoint(LOGIN_DATA, "login_token");
        let body = http.get(&url).await?.text().await?;
        let login_token = parser::parse_login_token(&body)?;

        // Step 3: credentials
        let password_hash = utils::login_hash(&self.password, &login_token);
        let form = [
            ("action", "login"),
            ("Password", password_hash.as_str()),
            ("Username", self.username.as_str()),
            ("_sessionTOKEN", session_token.as_str()),
        ];
        let url = self.endpoint(LOGIN_DATA, "login_entry");
        let body = http.post_form(&url, &form).await?.text().await?;
        if body.trim().is_empty() {
            return Err(RouterError::Protocol("empty login response".to_string()));
        }

        let resp: LoginResponse = serde_json::from_str(&body)?;
        check_login_response(&resp)?;

        if resp.login_need_refresh == Some(1) {
            tracing::debug!("Router asked for a login refresh");
        }
        Ok(resp)
    }

    async fn get_lan_devices(&mut self) -> Result<Vec<DeviceRecord>, RouterError> {
        self.session()?;
        let view = self.fresh_endpoint(MENU_VIEW, LAN_STATUS_VIEW);
        let data = self.fresh_endpoint(MENU_DATA, self.profile.lan_script);

        self.fetch_text(&view).await?;
        let body = self.fetch_text(&data).await?;
        parser::parse_devices(&body, self.profile.lan_container, NetworkType::Lan)
    }

    async fn get_wifi_devices(&mut self) -> Result<Vec<DeviceRecord>, RouterError> {
        self.session()?;
        let direct = self.fresh_endpoint(MENU_DATA, self.profile.wlan_script);

        let body = match self.fetch_text(&direct).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("Direct WLAN request failed ({}), re-priming view", e);
                let view = self.fresh_endpoint(MENU_VIEW, LAN_STATUS_VIEW);
                let retry = self.fresh_endpoint(MENU_DATA, self.profile.wlan_script);
                self.fetch_text(&view).await?;
                self.fetch_text(&retry).await?
            }
        };

        parser::parse_devices(&body, self.profile.wlan_container, NetworkType::Wlan)
    }

    /// Context view first, then the data script that depends on it
    async fn fetch_view_and_data(&mut self, view: &str, script: &str) -> Result<String, RouterError> {
        self.session()?;
        let view = self.fresh_endpoint(MENU_VIEW, view);
        let data = self.fresh_endpoint(MENU_DATA, script);

        self.fetch_text(&view).await?;
        self.fetch_text(&data).await
    }

    fn signing_key(&self) -> Result<RsaPublicKey, RouterError> {
        match &self.reboot_key {
            Some(key) => Ok(key.clone()),
            None => {
                tracing::warn!(
                    "Signing reboot with the bundled {} key; set router.public_key_file if the router answers CheckFailed",
                    self.model
                );
                self.profile.reboot_key()
            }
        }
    }

    async fn send_restart(&mut self) -> Result<(), RouterError> {
        let timeout = Duration::from_secs(self.http_config.reboot_timeout);
        let view_url = self.fresh_endpoint(MENU_VIEW, REBOOT_VIEW);
        let token_url = self.endpoint(LOGIN_DATA, "login_entry");
        let restart_url = self.endpoint(MENU_DATA, RESTART_SCRIPT);
        let key = self.signing_key()?;
        let http = self.session()?;

        let page = http.get_with_timeout(&view_url, timeout).await?.text().await?;
        let token = match parser::extract_session_token(&page) {
            Some(token) => token,
            None => {
                tracing::debug!("No token in reboot page, asking login_entry");
                let body = http.get_with_timeout(&token_url, timeout).await?.text().await?;
                let resp: SessionTokenResponse = serde_json::from_str(&body)?;
                resp.sess_token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| RouterError::Protocol("no session token for reboot".to_string()))?
            }
        };

        let payload = format!(
            "IF_ACTION=Restart&Btn_restart=&_sessionTOKEN={}",
            urlencoding::encode(&token)
        );
        let check = utils::sign_command(&payload, &key)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "Check",
            HeaderValue::from_str(&check).map_err(|e| RouterError::Signing(e.to_string()))?,
        );

        let body = http
            .post_raw_form_with_headers(&restart_url, &payload, headers, timeout)
            .await?
            .text()
            .await?;
        parser::check_command_response(&body)
    }
}

/// Failure signals in the login response, most severe first
fn check_login_response(resp: &LoginResponse) -> Result<(), RouterError> {
    match resp.locking_time {
        Some(t) if t < 0 => return Err(RouterError::Blocked),
        Some(t) if t > 0 => return Err(RouterError::Locked { seconds: t }),
        _ => {}
    }

    if let Some(msg) = resp.login_err_msg.as_deref() {
        if msg.to_lowercase().contains("password") {
            return Err(RouterError::BadCredentials(msg.to_string()));
        }
    }

    Ok(())
}

fn load_public_key(path: &Path) -> Result<RsaPublicKey, RouterError> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| RouterError::Signing(format!("{}: {}", path.display(), e)))?;
    RsaPublicKey::from_public_key_pem(&pem)
        .map_err(|e| RouterError::Signing(format!("{}: {}", path.display(), e)))
}

#[async_trait]
impl RouterApi for ZteClient {
    fn host(&self) -> &str {
        &self.host
    }

    fn model(&self) -> &str {
        self.model.as_str()
    }

    fn status_message(&self) -> Option<&str> {
        self.status_msg.as_deref()
    }

    async fn login(&mut self) -> Result<(), RouterError> {
        if self.is_logged_in() {
            tracing::debug!("Dropping previous session to {}", self.host);
        }
        self.session = None;
        self.login_data = None;

        let http = match HttpClient::new(&self.base_url, &self.http_config, self.verify_ssl) {
            Ok(http) => http,
            Err(e) => {
                self.status_msg = Some(format!("Failed login: {}", e));
                return Err(e);
            }
        };

        match self.run_login(&http).await {
            Ok(resp) => {
                tracing::debug!("Logged in to {} as {}", self.host, self.username);
                self.session = Some(http);
                self.login_data = Some(resp);
                self.status_msg = None;
                Ok(())
            }
            Err(e) => {
                let msg = format!("Failed login: {}", e);
                tracing::error!("{}", msg);
                self.status_msg = Some(msg);
                Err(e)
            }
        }
    }

    async fn logout(&mut self) {
        let session = self.session.take();
        let login_data = self.login_data.take();

        let (Some(http), Some(_)) = (session, login_data) else {
            return;
        };

        let url = self.endpoint(LOGIN_DATA, "logout_entry");
        match http.post_form(&url, &[("IF_LogOff", "1")]).await {
            Ok(_) => tracing::debug!("Logged out successfully"),
            Err(e) => tracing::error!("Failed to logout: {}", e),
        }
    }

    async fn get_devices_response(&mut self) -> Result<Vec<DeviceRecord>, RouterError> {
        let lan = self.get_lan_devices().await;
        if let Err(e) = &lan {
            let msg = format!("Failed to get LAN devices: {}", e);
            tracing::error!("{}", msg);
            self.status_msg = Some(msg);
        }

        let wlan = self.get_wifi_devices().await;
        if let Err(e) = &wlan {
            let msg = format!("Failed to get WiFi devices: {}", e);
            tracing::error!("{}", msg);
            self.status_msg = Some(msg);
        }

        match (lan, wlan) {
            (Err(e), Err(_)) => Err(e),
            (lan, wlan) => {
                let devices: Vec<DeviceRecord> = lan
                    .unwrap_or_default()
                    .into_iter()
                    .chain(wlan.unwrap_or_default())
                    .collect();
                tracing::debug!("Router reported {} devices", devices.len());
                Ok(devices)
            }
        }
    }

    async fn get_wan_status(&mut self) -> WanStatus {
        let profile = self.profile;
        let result = self
            .fetch_view_and_data(profile.wan_view, profile.wan_script)
            .await
            .and_then(|xml| parser::parse_wan_status(&xml, profile.wan_container));

        result.unwrap_or_else(|e| {
            tracing::warn!("Failed to get WAN status: {}", e);
            WanStatus::default()
        })
    }

    async fn get_router_details(&mut self) -> RouterDetails {
        let profile = self.profile;
        let result = self
            .fetch_view_and_data(profile.details_view, profile.details_script)
            .await
            .and_then(|xml| parser::parse_router_details(&xml));

        result.unwrap_or_else(|e| {
            tracing::warn!("Failed to get router details: {}", e);
            RouterDetails::default()
        })
    }

    async fn reboot(&mut self) -> Result<(), RouterError> {
        if let Err(e) = self.login().await {
            self.logout().await;
            return Err(e);
        }

        tracing::info!("Requesting router reboot");
        let result = self.send_restart().await;
        match &result {
            Ok(()) => tracing::info!("Reboot command accepted by {}", self.host),
            Err(e) => {
                let msg = format!("Failed to reboot: {}", e);
                tracing::error!("{}", msg);
                self.status_msg = Some(msg);
            }
        }

        self.logout().await;
        result
    }
}
