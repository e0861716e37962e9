//! Probe configuration loading.
//!
//! A host app (the typical embedding) constructs [`ProbeConfig`]
//! programmatically; the TOML loader mirrors
//! `forwarder::config::load_config_from_str`'s Raw/validated two-layer shape
//! and exists for the development harness and integration tests, not for
//! production mobile embedding.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `hub_url`
//! - `token`

use std::path::Path;
use std::time::Duration;

use probe_bus::DropPolicy;
use probe_db::DatabaseSpec;
use probe_protocol::DeviceInfo;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCaptureMode {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkCaptureScope {
    Http,
    WebSocket,
    All,
}

impl NetworkCaptureScope {
    pub fn includes_http(self) -> bool {
        matches!(self, NetworkCaptureScope::Http | NetworkCaptureScope::All)
    }

    pub fn includes_websocket(self) -> bool {
        matches!(self, NetworkCaptureScope::WebSocket | NetworkCaptureScope::All)
    }
}

/// Bridge-specific timers and batching knobs, nested the way
/// `ForwarderConfig` nests `UplinkConfig`.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub reconnect_interval: Duration,
    pub max_reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub recovery_batch_size: usize,
    pub recovery_interval: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        BridgeSettings {
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_interval: Duration::from_secs(30),
            max_reconnect_attempts: 0,
            heartbeat_interval: Duration::from_secs(15),
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
            recovery_batch_size: 50,
            recovery_interval: Duration::from_millis(500),
        }
    }
}

/// Where C3 persists events that cannot be uplinked right away. `None`
/// means in-memory (useful for tests and hosts with no writable directory
/// configured yet); `Some(path)` is the durable on-disk form the spec
/// requires for production embedding.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub sqlite_path: Option<std::path::PathBuf>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        JournalConfig { sqlite_path: None }
    }
}

/// Top-level probe configuration, constructed once by the host and handed
/// to [`crate::Probe::start`].
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub schema_version: u32,
    pub hub_url: String,
    pub token: String,
    pub device_info: DeviceInfo,
    pub enable_network_capture: bool,
    pub enable_log_capture: bool,
    pub max_buffer_size: usize,
    pub drop_policy: DropPolicy,
    pub network_capture_mode: NetworkCaptureMode,
    pub network_capture_scope: NetworkCaptureScope,
    pub enable_persistence: bool,
    pub max_persistence_queue_size: usize,
    pub persistence_retention_days: u32,
    pub breakpoint_timeout: Duration,
    pub bridge: BridgeSettings,
    pub journal: JournalConfig,
    pub databases: Vec<DatabaseSpec>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            schema_version: 1,
            hub_url: String::new(),
            token: String::new(),
            device_info: DeviceInfo {
                platform: String::new(),
                os_version: String::new(),
                app_version: String::new(),
                device_model: String::new(),
            },
            enable_network_capture: true,
            enable_log_capture: true,
            max_buffer_size: 10_000,
            drop_policy: DropPolicy::DropOldest,
            network_capture_mode: NetworkCaptureMode::Automatic,
            network_capture_scope: NetworkCaptureScope::All,
            enable_persistence: true,
            max_persistence_queue_size: 100_000,
            persistence_retention_days: 3,
            breakpoint_timeout: Duration::from_secs(30),
            bridge: BridgeSettings::default(),
            journal: JournalConfig::default(),
            databases: Vec::new(),
        }
    }
}

impl ProbeConfig {
    pub fn persistence_retention_seconds(&self) -> i64 {
        i64::from(self.persistence_retention_days) * 24 * 60 * 60
    }
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    hub_url: Option<String>,
    token: Option<String>,
    enable_network_capture: Option<bool>,
    enable_log_capture: Option<bool>,
    max_buffer_size: Option<usize>,
    network_capture_mode: Option<String>,
    network_capture_scope: Option<String>,
    enable_persistence: Option<bool>,
    max_persistence_queue_size: Option<usize>,
    persistence_retention_days: Option<u32>,
    breakpoint_timeout_secs: Option<u64>,
    device: Option<RawDeviceConfig>,
    bridge: Option<RawBridgeConfig>,
    journal: Option<RawJournalConfig>,
}

#[derive(Debug, Deserialize)]
struct RawDeviceConfig {
    platform: Option<String>,
    os_version: Option<String>,
    app_version: Option<String>,
    device_model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBridgeConfig {
    reconnect_interval_secs: Option<u64>,
    max_reconnect_interval_secs: Option<u64>,
    max_reconnect_attempts: Option<u32>,
    heartbeat_interval_secs: Option<u64>,
    batch_size: Option<usize>,
    flush_interval_secs: Option<u64>,
    recovery_batch_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawJournalConfig {
    sqlite_path: Option<String>,
}

/// Load probe config from a custom TOML file.
pub fn load_config_from_path(path: &Path) -> Result<ProbeConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

/// Load probe config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<ProbeConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let hub_url = raw
        .hub_url
        .ok_or_else(|| ConfigError::MissingField("hub_url".to_owned()))?;
    let token = raw
        .token
        .ok_or_else(|| ConfigError::MissingField("token".to_owned()))?;

    let device_info = match raw.device {
        Some(d) => DeviceInfo {
            platform: d.platform.unwrap_or_default(),
            os_version: d.os_version.unwrap_or_default(),
            app_version: d.app_version.unwrap_or_default(),
            device_model: d.device_model.unwrap_or_default(),
        },
        None => DeviceInfo {
            platform: String::new(),
            os_version: String::new(),
            app_version: String::new(),
            device_model: String::new(),
        },
    };

    let network_capture_mode = match raw.network_capture_mode.as_deref() {
        None | Some("automatic") => NetworkCaptureMode::Automatic,
        Some("manual") => NetworkCaptureMode::Manual,
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "network_capture_mode must be 'automatic' or 'manual', got '{other}'"
            )));
        }
    };

    let network_capture_scope = match raw.network_capture_scope.as_deref() {
        Some("http") => NetworkCaptureScope::Http,
        Some("websocket") => NetworkCaptureScope::WebSocket,
        None | Some("all") => NetworkCaptureScope::All,
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "network_capture_scope must be 'http', 'websocket', or 'all', got '{other}'"
            )));
        }
    };

    let defaults = BridgeSettings::default();
    let bridge = match raw.bridge {
        Some(b) => BridgeSettings {
            reconnect_interval: b
                .reconnect_interval_secs
                .map_or(defaults.reconnect_interval, Duration::from_secs),
            max_reconnect_interval: b
                .max_reconnect_interval_secs
                .map_or(defaults.max_reconnect_interval, Duration::from_secs),
            max_reconnect_attempts: b
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            heartbeat_interval: b
                .heartbeat_interval_secs
                .map_or(defaults.heartbeat_interval, Duration::from_secs),
            batch_size: b.batch_size.unwrap_or(defaults.batch_size),
            flush_interval: b
                .flush_interval_secs
                .map_or(defaults.flush_interval, Duration::from_secs),
            recovery_batch_size: b.recovery_batch_size.unwrap_or(defaults.recovery_batch_size),
            recovery_interval: defaults.recovery_interval,
        },
        None => defaults,
    };

    let journal = JournalConfig {
        sqlite_path: raw
            .journal
            .and_then(|j| j.sqlite_path)
            .map(std::path::PathBuf::from),
    };

    Ok(ProbeConfig {
        schema_version,
        hub_url,
        token,
        device_info,
        enable_network_capture: raw.enable_network_capture.unwrap_or(true),
        enable_log_capture: raw.enable_log_capture.unwrap_or(true),
        max_buffer_size: raw.max_buffer_size.unwrap_or(10_000),
        drop_policy: DropPolicy::DropOldest,
        network_capture_mode,
        network_capture_scope,
        enable_persistence: raw.enable_persistence.unwrap_or(true),
        max_persistence_queue_size: raw.max_persistence_queue_size.unwrap_or(100_000),
        persistence_retention_days: raw.persistence_retention_days.unwrap_or(3),
        breakpoint_timeout: raw
            .breakpoint_timeout_secs
            .map_or(Duration::from_secs(30), Duration::from_secs),
        bridge,
        journal,
        databases: Vec::new(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let cfg = load_config_from_str(
            r#"
            schema_version = 1
            hub_url = "wss://hub.example.com/probe"
            token = "abc123"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.hub_url, "wss://hub.example.com/probe");
        assert_eq!(cfg.max_buffer_size, 10_000);
        assert_eq!(cfg.network_capture_scope, NetworkCaptureScope::All);
        assert_eq!(cfg.bridge.batch_size, 100);
    }

    #[test]
    fn rejects_wrong_schema_version() {
        let err = load_config_from_str(
            r#"
            schema_version = 2
            hub_url = "wss://hub.example.com/probe"
            token = "abc123"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn rejects_missing_hub_url() {
        let err = load_config_from_str("schema_version = 1\ntoken = \"abc\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn overrides_bridge_and_journal_settings() {
        let cfg = load_config_from_str(
            r#"
            schema_version = 1
            hub_url = "wss://hub.example.com/probe"
            token = "abc123"
            network_capture_scope = "http"

            [bridge]
            batch_size = 25
            heartbeat_interval_secs = 5

            [journal]
            sqlite_path = "/tmp/probe-events.sqlite3"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bridge.batch_size, 25);
        assert_eq!(cfg.bridge.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(
            cfg.journal.sqlite_path,
            Some(std::path::PathBuf::from("/tmp/probe-events.sqlite3"))
        );
        assert_eq!(cfg.network_capture_scope, NetworkCaptureScope::Http);
    }
}
