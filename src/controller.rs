//! The lifecycle controller (C8): wires the bus, persistence queue, rule
//! engines, interception pipeline, and bridge client together from one
//! [`ProbeConfig`], mirroring how `forwarder::main` loads `ForwarderConfig`
//! once and hands it to the subsystems it starts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use probe_bridge::{BridgeClient, BridgeConfig, BridgeEvent, ConnectionState};
use probe_bus::EventBus;
use probe_db::DbInspector;
use probe_persist::PersistHandle;
use probe_pipeline::{Capture, CaptureError, FailureReason, Pipeline, PipelineOutcome, WsPipeline};
use probe_protocol::{DebugEvent, HttpRequest, LogEvent, WsOpcode};
use probe_rules::{BreakpointEngine, ChaosEngine, MockRuleEngine};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{NetworkCaptureScope, ProbeConfig};
use crate::error::ProbeError;

/// The running probe: one instance per host process, constructed once from
/// a [`ProbeConfig`] by [`Probe::start`].
pub struct Probe {
    bus: Arc<EventBus>,
    persist: Option<PersistHandle>,
    mock: Arc<MockRuleEngine>,
    breakpoints: Arc<BreakpointEngine>,
    chaos: Arc<ChaosEngine>,
    db: Option<Arc<DbInspector>>,
    pipeline: Pipeline,
    ws: WsPipeline,
    bridge: Arc<BridgeClient>,
    capture: Arc<dyn Capture>,
    network_capture_enabled: Arc<AtomicBool>,
    log_capture_enabled: Arc<AtomicBool>,
    network_capture_scope: NetworkCaptureScope,
    _toggle_task: tokio::task::JoinHandle<()>,
}

impl Probe {
    /// Build every subsystem from `config` and start the bridge's
    /// connect/reconnect loop. `capture` is the host's hook into its real
    /// HTTP/WebSocket stack (see [`Capture`]); it is used both for
    /// instrumented traffic and for uninstrumented `replayRequest` calls.
    pub async fn start(config: ProbeConfig, capture: Arc<dyn Capture>) -> Result<Self, ProbeError> {
        let bus = Arc::new(EventBus::new(config.max_buffer_size, config.drop_policy));

        let persist = if config.enable_persistence {
            Some(match &config.journal.sqlite_path {
                Some(path) => PersistHandle::spawn(
                    path.clone(),
                    config.max_persistence_queue_size,
                    config.persistence_retention_seconds(),
                )?,
                None => PersistHandle::spawn_in_memory(config.max_persistence_queue_size)?,
            })
        } else {
            None
        };

        let mock = Arc::new(MockRuleEngine::new());
        let breakpoints = Arc::new(BreakpointEngine::new(config.breakpoint_timeout));
        let chaos = Arc::new(ChaosEngine::new());
        let db = if config.databases.is_empty() {
            None
        } else {
            Some(Arc::new(DbInspector::new(config.databases.clone())))
        };

        let pipeline = Pipeline::new(mock.clone(), breakpoints.clone(), chaos.clone(), bus.clone());
        let ws = WsPipeline::new(mock.clone(), bus.clone());

        let bridge_config = BridgeConfig {
            hub_url: config.hub_url.clone(),
            token: config.token.clone(),
            device_info: config.device_info.clone(),
            reconnect_interval: config.bridge.reconnect_interval,
            max_reconnect_interval: config.bridge.max_reconnect_interval,
            max_reconnect_attempts: config.bridge.max_reconnect_attempts,
            heartbeat_interval: config.bridge.heartbeat_interval,
            batch_size: config.bridge.batch_size,
            flush_interval: config.bridge.flush_interval,
            recovery_batch_size: config.bridge.recovery_batch_size,
            recovery_interval: config.bridge.recovery_interval,
            enable_persistence: config.enable_persistence,
        };

        let (bridge, mut bridge_events) = BridgeClient::new(
            bridge_config,
            bus.clone(),
            persist.clone(),
            mock.clone(),
            breakpoints.clone(),
            chaos.clone(),
            db.clone(),
            Some(capture.clone()),
        );
        bridge.connect();

        let network_capture_enabled = Arc::new(AtomicBool::new(config.enable_network_capture));
        let log_capture_enabled = Arc::new(AtomicBool::new(config.enable_log_capture));

        let toggle_task = {
            let network_capture_enabled = network_capture_enabled.clone();
            let log_capture_enabled = log_capture_enabled.clone();
            tokio::spawn(async move {
                loop {
                    match bridge_events.recv().await {
                        Ok(BridgeEvent::ToggleCapture { network, log }) => {
                            network_capture_enabled.store(network, Ordering::SeqCst);
                            log_capture_enabled.store(log, Ordering::SeqCst);
                            info!(network, log, "capture toggled by hub");
                        }
                        Ok(BridgeEvent::StateChanged(_)) | Ok(BridgeEvent::Error(_)) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            })
        };

        Ok(Probe {
            bus,
            persist,
            mock,
            breakpoints,
            chaos,
            db,
            pipeline,
            ws,
            bridge,
            capture,
            network_capture_enabled,
            log_capture_enabled,
            network_capture_scope: config.network_capture_scope,
            _toggle_task: toggle_task,
        })
    }

    /// Disconnect cleanly and suppress reconnection. Buffered-but-unflushed
    /// events remain in the bus/persistence queue for a later `start`.
    pub fn stop(&self) {
        self.bridge.disconnect();
    }

    /// Force an immediate reconnect attempt outside the normal backoff
    /// schedule.
    pub fn reconnect(&self) {
        self.bridge.disconnect();
        self.bridge.reset_backoff();
        self.bridge.connect();
    }

    pub async fn bridge_state(&self) -> ConnectionState {
        self.bridge.state().await
    }

    pub fn subscribe_bridge_events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.bridge.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn mock_rules(&self) -> &MockRuleEngine {
        &self.mock
    }

    pub fn breakpoint_rules(&self) -> &BreakpointEngine {
        &self.breakpoints
    }

    pub fn chaos_rules(&self) -> &ChaosEngine {
        &self.chaos
    }

    pub fn set_network_capture_enabled(&self, enabled: bool) {
        self.network_capture_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_log_capture_enabled(&self, enabled: bool) {
        self.log_capture_enabled.store(enabled, Ordering::SeqCst);
    }

    fn http_capture_active(&self) -> bool {
        self.network_capture_enabled.load(Ordering::SeqCst)
            && self.network_capture_scope.includes_http()
    }

    fn ws_capture_active(&self) -> bool {
        self.network_capture_enabled.load(Ordering::SeqCst)
            && self.network_capture_scope.includes_websocket()
    }

    /// Entry point an instrumented HTTP call site invokes. Runs the full
    /// interception pipeline when HTTP capture is active; otherwise calls
    /// straight through to the host's real network stack, uninstrumented.
    pub async fn capture_http(&self, request: HttpRequest) -> PipelineOutcome {
        if !self.http_capture_active() {
            return match self.capture.on_request(request).await {
                Ok(response) => PipelineOutcome::Response(response),
                Err(e) => PipelineOutcome::Failed(capture_error_to_failure(e)),
            };
        }
        self.pipeline.capture_http(request, self.capture.as_ref()).await
    }

    /// Record a WebSocket session open and return the `session_id` the
    /// caller should use for subsequent frame calls.
    pub fn open_ws_session(
        &self,
        url: String,
        request_headers: HashMap<String, String>,
        subprotocols: Vec<String>,
    ) -> Uuid {
        if self.ws_capture_active() {
            self.ws.open_session(url, request_headers, subprotocols)
        } else {
            Uuid::new_v4()
        }
    }

    pub fn close_ws_session(
        &self,
        session_id: Uuid,
        close_code: Option<u16>,
        close_reason: Option<String>,
    ) {
        if self.ws_capture_active() {
            self.ws.close_session(session_id, close_code, close_reason);
        }
    }

    pub async fn send_ws_frame(
        &self,
        session_id: Uuid,
        opcode: WsOpcode,
        payload: Vec<u8>,
    ) -> Result<(), CaptureError> {
        if self.ws_capture_active() {
            self.ws
                .send_outgoing_frame(session_id, opcode, payload, self.capture.as_ref())
                .await
        } else {
            self.capture.on_ws_frame(session_id, payload).await
        }
    }

    pub fn receive_ws_frame(&self, session_id: Uuid, opcode: WsOpcode, payload: Vec<u8>) -> Vec<u8> {
        if self.ws_capture_active() {
            self.ws.receive_incoming_frame(session_id, opcode, payload)
        } else {
            payload
        }
    }

    /// Record a host log line, subject to the log-capture toggle.
    pub fn log(&self, event: LogEvent) {
        if self.log_capture_enabled.load(Ordering::SeqCst) {
            self.bus.enqueue(DebugEvent::Log(event));
        }
    }
}

fn capture_error_to_failure(e: CaptureError) -> FailureReason {
    match e {
        CaptureError::Timeout => FailureReason::Timeout,
        CaptureError::ConnectionReset => FailureReason::ConnectionReset,
        CaptureError::Other(s) => {
            warn!(error = %s, "uninstrumented capture call failed");
            FailureReason::Network(s)
        }
    }
}
