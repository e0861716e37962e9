//! Bridge client configuration, with the hub defaults baked in as
//! `Default::default()`.

use std::time::Duration;

use probe_protocol::DeviceInfo;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub hub_url: String,
    pub token: String,
    pub device_info: DeviceInfo,
    pub reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
    /// 0 means retry forever.
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub recovery_batch_size: usize,
    pub recovery_interval: Duration,
    pub enable_persistence: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            hub_url: String::new(),
            token: String::new(),
            device_info: DeviceInfo {
                platform: String::new(),
                os_version: String::new(),
                app_version: String::new(),
                device_model: String::new(),
            },
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_interval: Duration::from_secs(30),
            max_reconnect_attempts: 0,
            heartbeat_interval: Duration::from_secs(15),
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
            recovery_batch_size: 50,
            recovery_interval: Duration::from_millis(500),
            enable_persistence: true,
        }
    }
}
