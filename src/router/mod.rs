//! Router abstraction layer
//!
//! The coordinator only ever talks to a router through `RouterApi`. Each
//! polling cycle brackets its work in one `login`/`logout` pair; nothing
//! else may touch the session in between.

pub mod profile;
pub mod zte;

pub use profile::RouterModel;
pub use zte::ZteClient;

use crate::error::RouterError;
use crate::models::{DeviceRecord, RouterDetails, WanStatus};
use async_trait::async_trait;

#[async_trait]
pub trait RouterApi: Send + Sync {
    /// Host the client talks to, for display
    fn host(&self) -> &str;

    /// Model identifier the client was configured with
    fn model(&self) -> &str;

    /// Diagnostic message from the last operation, if it failed
    fn status_message(&self) -> Option<&str>;

    /// Run the challenge-response login, replacing any previous session
    async fn login(&mut self) -> Result<(), RouterError>;

    /// Best-effort logoff; always drops the session
    async fn logout(&mut self);

    /// LAN and WLAN clients; fails only if both listings fail
    async fn get_devices_response(&mut self) -> Result<Vec<DeviceRecord>, RouterError>;

    /// Empty on any failure
    async fn get_wan_status(&mut self) -> WanStatus;

    /// Empty on any failure
    async fn get_router_details(&mut self) -> RouterDetails;

    /// Fresh login, signed restart command, unconditional logout
    async fn reboot(&mut self) -> Result<(), RouterError>;
}
