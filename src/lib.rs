//! Debug probe: an embeddable mobile-app library that captures HTTP/WebSocket
//! traffic and log events, applies hub-controlled mock/breakpoint/chaos
//! rules, and uplinks everything to a remote debug hub over a persistent
//! WebSocket bridge.
//!
//! The crate root only wires the independently testable subsystems
//! together ([`Probe`]); each subsystem lives in its own workspace member
//! (`probe-bus`, `probe-persist`, `probe-rules`, `probe-pipeline`,
//! `probe-bridge`, `probe-db`) and is re-exported here for convenience.

pub mod config;
pub mod controller;
pub mod error;

pub use config::{
    BridgeSettings, JournalConfig, NetworkCaptureMode, NetworkCaptureScope, ProbeConfig,
};
pub use controller::Probe;
pub use error::ProbeError;

pub use probe_bridge::{BridgeEvent, ConnectionState};
pub use probe_bus::DropPolicy;
pub use probe_db::DatabaseSpec;
pub use probe_pipeline::{Capture, CaptureError, FailureReason, PipelineOutcome};
pub use probe_protocol::{DebugEvent, DeviceInfo, HttpRequest, HttpResponse, LogEvent, WsOpcode};
pub use probe_rules::{BreakpointEngine, ChaosEngine, MockRuleEngine};

/// Initialize the process-wide `tracing` subscriber from the `RUST_LOG`
/// environment variable, defaulting to `info` when unset.
///
/// Mirrors `forwarder::main`'s logging setup; host apps embedding the probe
/// in a process that already installs its own subscriber should skip this
/// and call [`Probe::start`] directly.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
