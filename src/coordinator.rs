//! Polling coordinator
//!
//! Drives one router client on a schedule, merges each scan into a MAC-keyed
//! cache that only ever grows, and stretches or shrinks the poll interval
//! depending on how much the active-device count moves.

use crate::config::PollingConfig;
use crate::models::{DeviceRecord, NetworkType, RouterDetails, WanStatus};
use crate::router::RouterApi;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
pub const FAST_UPDATE_INTERVAL: Duration = Duration::from_secs(30);
pub const SLOW_UPDATE_INTERVAL: Duration = Duration::from_secs(120);

/// How long cached devices are served after the router stops answering
const STALE_CACHE_WINDOW_MINUTES: i64 = 10;

/// A device as presented to consumers, stable across scans
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedDevice {
    pub name: String,
    pub ip: String,
    pub mac: String,
    pub active: bool,
    pub icon_type: Option<String>,
    pub network_type: NetworkType,
    pub last_seen: DateTime<Utc>,
    pub port: Option<String>,
    pub link_time: Option<String>,
    pub connect_time: Option<String>,
}

impl TrackedDevice {
    fn from_record(record: &DeviceRecord, now: DateTime<Utc>) -> Self {
        Self {
            name: record.host_name.clone(),
            ip: record.ip_address.clone(),
            mac: record.mac_address.clone(),
            active: record.active,
            icon_type: record.icon_type.clone(),
            network_type: record.network_type,
            last_seen: now,
            port: record.port.clone(),
            link_time: record.link_time.clone(),
            connect_time: record.connect_time.clone(),
        }
    }

    fn has_generic_name(&self) -> bool {
        self.name == DeviceRecord::UNKNOWN_NAME || self.name == self.mac
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterStatus {
    Connected,
    Unavailable,
    Paused,
}

impl fmt::Display for RouterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterStatus::Connected => write!(f, "connected"),
            RouterStatus::Unavailable => write!(f, "unavailable"),
            RouterStatus::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterInfo {
    pub host: String,
    pub model: String,
    pub status: RouterStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_devices: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_devices: Option<usize>,
    #[serde(flatten)]
    pub wan: WanStatus,
    #[serde(flatten)]
    pub details: RouterDetails,
}

/// Everything one poll cycle produces
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorData {
    pub devices: BTreeMap<String, TrackedDevice>,
    pub router_info: RouterInfo,
}

#[derive(Default)]
struct FetchOutcome {
    devices: Option<Vec<DeviceRecord>>,
    wan: Option<WanStatus>,
    details: Option<RouterDetails>,
}

/// One login/fetch/logout bracket. Runs on a spawned task.
async fn fetch_router_data<C: RouterApi + ?Sized>(
    client: &mut C,
    query_wan_status: bool,
    query_router_details: bool,
) -> FetchOutcome {
    if let Err(e) = client.login().await {
        if e.is_auth_failure() {
            tracing::error!("Login rejected by {}: {}", client.host(), e);
        } else {
            tracing::warn!(
                "Login failed for {}: {}",
                client.host(),
                client.status_message().unwrap_or("unknown error")
            );
        }
        client.logout().await;
        return FetchOutcome::default();
    }

    let devices = client.get_devices_response().await.ok();
    let wan = if query_wan_status {
        let wan = client.get_wan_status().await;
        if wan.is_empty() {
            tracing::debug!("No WAN status from {}", client.host());
        }
        Some(wan)
    } else {
        None
    };
    let details = if query_router_details {
        let details = client.get_router_details().await;
        if details.is_empty() {
            tracing::debug!("No router details from {}", client.host());
        }
        Some(details)
    } else {
        None
    };

    client.logout().await;

    FetchOutcome {
        devices,
        wan,
        details,
    }
}

pub struct Coordinator<C: RouterApi + 'static> {
    client: Arc<Mutex<C>>,
    host: String,
    model: String,
    query_wan_status: bool,
    query_router_details: bool,
    available: bool,
    paused: bool,
    register_new_devices: bool,
    last_device_count: usize,
    stable_count: u32,
    update_interval: Duration,
    device_cache: BTreeMap<String, TrackedDevice>,
    last_successful_update: Option<DateTime<Utc>>,
    data: Option<CoordinatorData>,
}

impl<C: RouterApi + 'static> Coordinator<C> {
    pub fn new(client: C, polling: &PollingConfig) -> Self {
        Self {
            host: client.host().to_string(),
            model: client.model().to_string(),
            client: Arc::new(Mutex::new(client)),
            query_wan_status: polling.query_wan_status,
            query_router_details: polling.query_router_details,
            available: true,
            paused: false,
            register_new_devices: polling.register_new_devices,
            last_device_count: 0,
            stable_count: 0,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            device_cache: BTreeMap::new(),
            last_successful_update: None,
            data: None,
        }
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn register_new_devices(&self) -> bool {
        self.register_new_devices
    }

    pub fn set_register_new_devices(&mut self, enabled: bool) {
        self.register_new_devices = enabled;
        if enabled {
            tracing::info!("New devices will be registered");
        } else {
            tracing::info!("New devices will not be registered");
        }
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Snapshot from the most recent poll
    pub fn data(&self) -> Option<&CoordinatorData> {
        self.data.as_ref()
    }

    pub async fn pause_scanning(&mut self) {
        self.paused = true;
        self.client.lock().await.logout().await;
        tracing::info!("Scanning paused");
    }

    pub fn resume_scanning(&mut self) {
        self.paused = false;
        tracing::info!("Scanning resumed");
    }

    /// Reboot through the client without touching poll state
    pub async fn async_reboot_router(&self) -> bool {
        let client = Arc::clone(&self.client);
        let task = tokio::spawn(async move { client.lock().await.reboot().await });

        match task.await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!("Failed to reboot router: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("Reboot task failed: {}", e);
                false
            }
        }
    }

    /// Run one poll cycle and remember its result
    pub async fn refresh(&mut self) -> CoordinatorData {
        let data = self.async_update_data().await;
        self.data = Some(data.clone());
        data
    }

    fn router_info(&self, status: RouterStatus) -> RouterInfo {
        RouterInfo {
            host: self.host.clone(),
            model: self.model.clone(),
            status,
            last_update: None,
            active_devices: None,
            total_devices: None,
            wan: WanStatus::default(),
            details: RouterDetails::default(),
        }
    }

    async fn async_update_data(&mut self) -> CoordinatorData {
        if self.paused {
            tracing::debug!("Scanning paused, returning cached data");
            return CoordinatorData {
                devices: self.device_cache.clone(),
                router_info: self.router_info(RouterStatus::Paused),
            };
        }

        let client = Arc::clone(&self.client);
        let (query_wan, query_details) = (self.query_wan_status, self.query_router_details);
        let task = tokio::spawn(async move {
            let mut client = client.lock().await;
            fetch_router_data(&mut *client, query_wan, query_details).await
        });
        let outcome = task.await.unwrap_or_else(|e| {
            tracing::error!("Error fetching device data: {}", e);
            FetchOutcome::default()
        });

        let now = Utc::now();
        let Some(devices) = outcome.devices else {
            self.available = false;
            let window = chrono::Duration::minutes(STALE_CACHE_WINDOW_MINUTES);
            let fresh_enough = self
                .last_successful_update
                .is_some_and(|t| now - t < window);

            let devices = if !self.device_cache.is_empty() && fresh_enough {
                tracing::warn!("Using cached data due to connection failure");
                self.device_cache.clone()
            } else {
                BTreeMap::new()
            };
            return CoordinatorData {
                devices,
                router_info: self.router_info(RouterStatus::Unavailable),
            };
        };

        self.available = true;
        self.last_successful_update = Some(now);

        let processed = self.merge_device_data(&devices, now);
        let active_count = processed.values().filter(|d| d.active).count();
        self.adjust_update_interval(active_count);

        let mut router_info = self.router_info(RouterStatus::Connected);
        router_info.last_update = Some(now);
        router_info.active_devices = Some(active_count);
        router_info.total_devices = Some(processed.len());
        router_info.wan = outcome.wan.unwrap_or_default();
        router_info.details = outcome.details.unwrap_or_default();

        CoordinatorData {
            devices: processed,
            router_info,
        }
    }

    /// Fold a scan into the cache; devices missing from it come back inactive
    fn merge_device_data(
        &mut self,
        new_devices: &[DeviceRecord],
        now: DateTime<Utc>,
    ) -> BTreeMap<String, TrackedDevice> {
        let mut processed = BTreeMap::new();
        let mut current_macs = HashSet::new();

        for record in new_devices {
            if record.mac_address.is_empty() {
                continue;
            }

            let mut device = TrackedDevice::from_record(record, now);
            if let Some(cached) = self.device_cache.get(&device.mac) {
                if device.has_generic_name() && !cached.has_generic_name() {
                    device.name = cached.name.clone();
                }
                if !device.active {
                    device.last_seen = cached.last_seen;
                }
            }

            current_macs.insert(device.mac.clone());
            self.device_cache.insert(device.mac.clone(), device.clone());
            processed.insert(device.mac.clone(), device);
        }

        for (mac, cached) in self.device_cache.iter_mut() {
            if !current_macs.contains(mac) {
                cached.active = false;
                processed.insert(mac.clone(), cached.clone());
            }
        }

        processed
    }

    fn adjust_update_interval(&mut self, device_count: usize) {
        if device_count == self.last_device_count {
            self.stable_count += 1;
        } else {
            self.stable_count = 0;
            self.last_device_count = device_count;
        }

        let new_interval = if self.stable_count > 5 {
            SLOW_UPDATE_INTERVAL
        } else if self.stable_count < 2 {
            FAST_UPDATE_INTERVAL
        } else {
            DEFAULT_UPDATE_INTERVAL
        };

        if new_interval != self.update_interval {
            tracing::debug!(
                "Adjusting update interval from {:?} to {:?} (stable count: {})",
                self.update_interval,
                new_interval,
                self.stable_count
            );
            self.update_interval = new_interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeState {
        calls: Vec<&'static str>,
        login_ok: bool,
        devices: Option<Vec<DeviceRecord>>,
        reboot_ok: bool,
    }

    struct FakeRouter {
        state: Arc<StdMutex<FakeState>>,
    }

    impl FakeRouter {
        fn new(devices: Vec<DeviceRecord>) -> (Self, Arc<StdMutex<FakeState>>) {
            let state = Arc::new(StdMutex::new(FakeState {
                calls: Vec::new(),
                login_ok: true,
                devices: Some(devices),
                reboot_ok: true,
            }));
            (
                Self {
                    state: Arc::clone(&state),
                },
                state,
            )
        }

        fn record(&self, call: &'static str) {
            self.state.lock().unwrap().calls.push(call);
        }
    }

    #[async_trait]
    impl RouterApi for FakeRouter {
        fn host(&self) -> &str {
            "192.168.1.1"
        }

        fn model(&self) -> &str {
            "F6640"
        }

        fn status_message(&self) -> Option<&str> {
            None
        }

        async fn login(&mut self) -> Result<(), RouterError> {
            self.record("login");
            if self.state.lock().unwrap().login_ok {
                Ok(())
            } else {
                Err(RouterError::BadCredentials("bad password".into()))
            }
        }

        async fn logout(&mut self) {
            self.record("logout");
        }

        async fn get_devices_response(&mut self) -> Result<Vec<DeviceRecord>, RouterError> {
            self.record("devices");
            self.state
                .lock()
                .unwrap()
                .devices
                .clone()
                .ok_or_else(|| RouterError::Protocol("no listing".into()))
        }

        async fn get_wan_status(&mut self) -> WanStatus {
            self.record("wan");
            WanStatus {
                wan_connection_status: Some("Connected".into()),
                ..Default::default()
            }
        }

        async fn get_router_details(&mut self) -> RouterDetails {
            self.record("details");
            RouterDetails::default()
        }

        async fn reboot(&mut self) -> Result<(), RouterError> {
            self.record("reboot");
            if self.state.lock().unwrap().reboot_ok {
                Ok(())
            } else {
                Err(RouterError::RouterReported("CheckFailed".into()))
            }
        }
    }

    fn record(mac: &str, name: &str, active: bool) -> DeviceRecord {
        DeviceRecord {
            mac_address: mac.to_string(),
            host_name: name.to_string(),
            ip_address: "192.168.1.50".to_string(),
            active,
            icon_type: None,
            network_type: NetworkType::Lan,
            port: Some("LAN2".to_string()),
            link_time: None,
            connect_time: None,
        }
    }

    fn coordinator(devices: Vec<DeviceRecord>) -> (Coordinator<FakeRouter>, Arc<StdMutex<FakeState>>) {
        let (router, state) = FakeRouter::new(devices);
        (Coordinator::new(router, &PollingConfig::default()), state)
    }

    fn take_calls(state: &Arc<StdMutex<FakeState>>) -> Vec<&'static str> {
        std::mem::take(&mut state.lock().unwrap().calls)
    }

    #[tokio::test]
    async fn test_first_poll_reports_connected_device() {
        let (mut coord, state) = coordinator(vec![record("00:11:22:33:44:55", "phone", true)]);

        let data = coord.refresh().await;

        assert_eq!(
            data.devices.keys().collect::<Vec<_>>(),
            vec!["00:11:22:33:44:55"]
        );
        assert!(data.devices["00:11:22:33:44:55"].active);
        assert_eq!(data.router_info.status, RouterStatus::Connected);
        assert_eq!(data.router_info.active_devices, Some(1));
        assert_eq!(data.router_info.total_devices, Some(1));
        assert_eq!(
            data.router_info.wan.wan_connection_status.as_deref(),
            Some("Connected")
        );
        assert!(coord.available());
        assert_eq!(
            take_calls(&state),
            vec!["login", "devices", "wan", "details", "logout"]
        );
    }

    #[tokio::test]
    async fn test_enrichments_can_be_disabled() {
        let (router, state) = FakeRouter::new(vec![]);
        let polling = PollingConfig {
            query_wan_status: false,
            query_router_details: false,
            ..Default::default()
        };
        let mut coord = Coordinator::new(router, &polling);

        let data = coord.refresh().await;

        assert!(data.router_info.wan.is_empty());
        assert_eq!(take_calls(&state), vec!["login", "devices", "logout"]);
    }

    #[tokio::test]
    async fn test_login_failure_without_cache_is_empty() {
        let (mut coord, state) = coordinator(vec![]);
        state.lock().unwrap().login_ok = false;

        let data = coord.refresh().await;

        assert!(data.devices.is_empty());
        assert_eq!(data.router_info.status, RouterStatus::Unavailable);
        assert!(!coord.available());
        assert_eq!(take_calls(&state), vec!["login", "logout"]);
    }

    #[tokio::test]
    async fn test_recent_cache_served_while_unavailable() {
        let (mut coord, state) = coordinator(vec![record("AA:BB:CC:DD:EE:FF", "tv", true)]);
        coord.refresh().await;

        state.lock().unwrap().devices = None;
        let data = coord.refresh().await;
        assert_eq!(data.router_info.status, RouterStatus::Unavailable);
        assert!(data.devices.contains_key("AA:BB:CC:DD:EE:FF"));

        coord.last_successful_update = Some(Utc::now() - chrono::Duration::minutes(11));
        let data = coord.refresh().await;
        assert!(data.devices.is_empty());
        assert!(!coord.available());
    }

    #[tokio::test]
    async fn test_pause_serves_cache_without_network() {
        let (mut coord, state) = coordinator(vec![record("AA:BB:CC:DD:EE:FF", "tv", true)]);
        let before = coord.refresh().await;
        take_calls(&state);

        coord.pause_scanning().await;
        assert!(coord.paused());
        assert_eq!(take_calls(&state), vec!["logout"]);

        let paused = coord.refresh().await;
        assert_eq!(paused.router_info.status, RouterStatus::Paused);
        assert_eq!(paused.devices, before.devices);
        assert!(take_calls(&state).is_empty());

        coord.resume_scanning();
        coord.refresh().await;
        assert_eq!(take_calls(&state).first(), Some(&"login"));
    }

    #[tokio::test]
    async fn test_reboot_leaves_poll_state_alone() {
        let (coord, state) = coordinator(vec![]);

        assert!(coord.async_reboot_router().await);
        state.lock().unwrap().reboot_ok = false;
        assert!(!coord.async_reboot_router().await);

        assert!(coord.data().is_none());
        assert_eq!(coord.update_interval(), DEFAULT_UPDATE_INTERVAL);
        assert_eq!(take_calls(&state), vec!["reboot", "reboot"]);
    }

    #[tokio::test]
    async fn test_snapshot_serializes_for_consumers() {
        let (mut coord, _) = coordinator(vec![record("00:11:22:33:44:55", "phone", true)]);
        let data = coord.refresh().await;

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["router_info"]["status"], "connected");
        assert_eq!(json["router_info"]["wan_connection_status"], "Connected");
        assert_eq!(json["devices"]["00:11:22:33:44:55"]["active"], true);
        assert_eq!(json["devices"]["00:11:22:33:44:55"]["network_type"], "LAN");
        assert!(coord.data().is_some());
    }

    #[test]
    fn test_register_policy_toggle() {
        let (mut coord, _) = coordinator(vec![]);
        assert!(coord.register_new_devices());
        coord.set_register_new_devices(false);
        assert!(!coord.register_new_devices());
    }

    #[test]
    fn test_cached_name_survives_generic_name() {
        let (mut coord, _) = coordinator(vec![]);
        let t0 = Utc::now();
        let mac = "AA:BB:CC:DD:EE:FF";

        coord.merge_device_data(&[record(mac, "LivingRoomTV", true)], t0);
        let merged = coord.merge_device_data(&[record(mac, "Unknown", true)], t0);
        assert_eq!(merged[mac].name, "LivingRoomTV");

        let merged = coord.merge_device_data(&[record(mac, mac, true)], t0);
        assert_eq!(merged[mac].name, "LivingRoomTV");

        let merged = coord.merge_device_data(&[record(mac, "Bedroom TV", true)], t0);
        assert_eq!(merged[mac].name, "Bedroom TV");
    }

    #[test]
    fn test_absent_device_keeps_last_seen() {
        let (mut coord, _) = coordinator(vec![]);
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(5);
        let t2 = t1 + chrono::Duration::minutes(5);

        coord.merge_device_data(
            &[
                record("AA:AA:AA:AA:AA:AA", "laptop", true),
                record("BB:BB:BB:BB:BB:BB", "phone", true),
            ],
            t0,
        );

        // laptop vanishes, phone reported but inactive
        let merged = coord.merge_device_data(&[record("BB:BB:BB:BB:BB:BB", "phone", false)], t1);
        let laptop = &merged["AA:AA:AA:AA:AA:AA"];
        assert!(!laptop.active);
        assert_eq!(laptop.last_seen, t0);
        assert_eq!(laptop.name, "laptop");
        assert_eq!(laptop.ip, "192.168.1.50");
        assert_eq!(laptop.port.as_deref(), Some("LAN2"));
        assert_eq!(merged["BB:BB:BB:BB:BB:BB"].last_seen, t0);

        let merged = coord.merge_device_data(&[record("BB:BB:BB:BB:BB:BB", "phone", true)], t2);
        assert_eq!(merged["BB:BB:BB:BB:BB:BB"].last_seen, t2);
        assert_eq!(merged["AA:AA:AA:AA:AA:AA"].last_seen, t0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (mut coord, _) = coordinator(vec![]);
        let t0 = Utc::now();
        let scan = [
            record("AA:AA:AA:AA:AA:AA", "laptop", true),
            record("BB:BB:BB:BB:BB:BB", "phone", false),
        ];

        let first = coord.merge_device_data(&scan, t0);
        let second = coord.merge_device_data(&scan, t0);
        assert_eq!(first, second);

        let t1 = t0 + chrono::Duration::minutes(1);
        let emptied = coord.merge_device_data(&[], t1);
        let emptied_again = coord.merge_device_data(&[], t1);
        assert_eq!(emptied, emptied_again);
        assert_eq!(emptied.len(), 2);
        assert!(emptied.values().all(|d| !d.active));
        assert_eq!(emptied["AA:AA:AA:AA:AA:AA"].name, "laptop");
    }

    #[test]
    fn test_records_without_mac_are_ignored() {
        let (mut coord, _) = coordinator(vec![]);
        let merged = coord.merge_device_data(&[record("", "ghost", true)], Utc::now());
        assert!(merged.is_empty());
    }

    #[test]
    fn test_interval_hysteresis() {
        let (mut coord, _) = coordinator(vec![]);
        assert_eq!(coord.update_interval(), DEFAULT_UPDATE_INTERVAL);

        let mut seen = Vec::new();
        for _ in 0..6 {
            coord.adjust_update_interval(0);
            seen.push(coord.update_interval());
        }
        assert_eq!(
            seen,
            vec![
                FAST_UPDATE_INTERVAL,
                DEFAULT_UPDATE_INTERVAL,
                DEFAULT_UPDATE_INTERVAL,
                DEFAULT_UPDATE_INTERVAL,
                DEFAULT_UPDATE_INTERVAL,
                SLOW_UPDATE_INTERVAL,
            ]
        );

        coord.adjust_update_interval(4);
        assert_eq!(coord.update_interval(), FAST_UPDATE_INTERVAL);
    }
}
