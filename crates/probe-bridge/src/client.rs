//! The bridge client (C6): owns the WebSocket connection to the hub, the
//! connection state machine, and the background timers that keep it
//! registered, flushing, recovering, and reconnecting.
//!
//! The outer loop restarts a fresh [`BridgeSession`] on every failure rather
//! than modeling retry as per-call bookkeeping the way
//! `forwarder::uplink::UplinkSession` does for a single batch; reconnect
//! backoff is loosely grounded on `receiver::control_api::AppState`'s
//! retry-streak counters, generalized from a fixed counter into a
//! doubling-with-cap interval that resets once the hub confirms
//! registration.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use probe_bus::EventBus;
use probe_db::DbInspector;
use probe_persist::PersistHandle;
use probe_pipeline::Capture;
use probe_protocol::{
    BreakpointAction, BreakpointResumePayload, BridgeMessage, DbCommandPayload, DbResponsePayload,
    HttpRequest, ReplayRequestPayload,
};
use probe_rules::breakpoint::WireResumeAction;
use probe_rules::{BreakpointEngine, ChaosEngine, MockRuleEngine};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, warn};

use crate::config::BridgeConfig;
use crate::session::{BridgeSession, SessionError};
use crate::state::ConnectionState;

/// Host-observable notifications the bridge client emits as it runs.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    StateChanged(ConnectionState),
    Error(String),
    ToggleCapture { network: bool, log: bool },
}

pub struct BridgeClient {
    config: BridgeConfig,
    bus: Arc<EventBus>,
    persist: Option<PersistHandle>,
    mock: Arc<MockRuleEngine>,
    breakpoints: Arc<BreakpointEngine>,
    chaos: Arc<ChaosEngine>,
    db: Option<Arc<DbInspector>>,
    replay_capture: Option<Arc<dyn Capture>>,
    state: RwLock<ConnectionState>,
    events: broadcast::Sender<BridgeEvent>,
    manual_disconnect: AtomicBool,
    reconnect_attempts: AtomicU32,
}

impl BridgeClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BridgeConfig,
        bus: Arc<EventBus>,
        persist: Option<PersistHandle>,
        mock: Arc<MockRuleEngine>,
        breakpoints: Arc<BreakpointEngine>,
        chaos: Arc<ChaosEngine>,
        db: Option<Arc<DbInspector>>,
        replay_capture: Option<Arc<dyn Capture>>,
    ) -> (Arc<Self>, broadcast::Receiver<BridgeEvent>) {
        let (events, rx) = broadcast::channel(64);
        let client = Arc::new(BridgeClient {
            config,
            bus,
            persist,
            mock,
            breakpoints,
            chaos,
            db,
            replay_capture,
            state: RwLock::new(ConnectionState::Disconnected),
            events,
            manual_disconnect: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
        });
        (client, rx)
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Spawn the background connect/reconnect loop. Returns immediately;
    /// the loop runs until [`BridgeClient::disconnect`] is called or
    /// `max_reconnect_attempts` is exhausted.
    pub fn connect(self: &Arc<Self>) {
        self.manual_disconnect.store(false, Ordering::SeqCst);
        let me = self.clone();
        tokio::spawn(async move { me.run().await });
        let flusher = self.clone();
        tokio::spawn(async move { flusher.run_persist_flush_loop().await });
    }

    /// Stop the client: the active session (if any) is closed and no
    /// further reconnect attempts are made.
    pub fn disconnect(&self) {
        self.manual_disconnect.store(true, Ordering::SeqCst);
    }

    /// Reset the reconnect backoff so the next attempt happens at the base
    /// interval instead of wherever the doubling sequence had reached.
    pub fn reset_backoff(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
        let _ = self.events.send(BridgeEvent::StateChanged(state));
    }

    async fn run(self: Arc<Self>) {
        let mut interval = self.config.reconnect_interval;
        loop {
            if self.manual_disconnect.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected).await;
                return;
            }

            self.set_state(ConnectionState::Connecting).await;
            if let Err(e) = self.run_session().await {
                warn!(error = %e, "bridge session ended");
                let _ = self.events.send(BridgeEvent::Error(e.to_string()));
            }
            self.set_state(ConnectionState::Disconnected).await;

            if self.manual_disconnect.load(Ordering::SeqCst) {
                return;
            }

            let attempts = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.config.max_reconnect_attempts > 0
                && attempts > self.config.max_reconnect_attempts
            {
                error!(attempts, "giving up reconnecting to hub");
                return;
            }

            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(self.config.max_reconnect_interval);
        }
    }

    async fn run_session(&self) -> Result<(), SessionError> {
        let mut session = BridgeSession::connect(
            &self.config.hub_url,
            &self.config.token,
            self.config.device_info.clone(),
        )
        .await?;

        self.reset_backoff();
        self.set_state(ConnectionState::Connected).await;
        self.set_state(ConnectionState::Registered).await;

        if let Some(persist) = self.persist.clone() {
            self.recover_persisted(&mut session, &persist).await?;
        }

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        let mut flush = tokio::time::interval(self.config.flush_interval);
        heartbeat.tick().await;
        flush.tick().await;

        loop {
            if self.manual_disconnect.load(Ordering::SeqCst) {
                session.close().await;
                return Ok(());
            }

            tokio::select! {
                _ = heartbeat.tick() => {
                    session.send(&BridgeMessage::Heartbeat).await?;
                }
                _ = flush.tick() => {
                    self.flush_once(&mut session).await?;
                }
                incoming = session.recv() => {
                    let msg = incoming?;
                    self.dispatch(&mut session, msg).await?;
                }
            }
        }
    }

    /// Drain any events persisted while disconnected, in fixed-size batches
    /// paced at `recovery_interval`, before resuming live flushing.
    async fn recover_persisted(
        &self,
        session: &mut BridgeSession,
        persist: &PersistHandle,
    ) -> Result<(), SessionError> {
        loop {
            let batch = persist
                .dequeue_batch(self.config.recovery_batch_size)
                .await
                .unwrap_or_default();
            if batch.is_empty() {
                return Ok(());
            }
            session.send(&BridgeMessage::Events(batch)).await?;
            tokio::time::sleep(self.config.recovery_interval).await;
        }
    }

    /// Runs for the lifetime of a `connect()` call, independent of
    /// `run_session`'s own connected-only flush timer. While the bridge
    /// isn't `Registered` (disconnected, connecting, or between reconnect
    /// attempts) nothing else ever drains C2, so this ticks on the same
    /// `flush_interval` and spills the bus straight to C3 whenever
    /// persistence is enabled.
    async fn run_persist_flush_loop(self: Arc<Self>) {
        let Some(persist) = self.persist.clone() else {
            return;
        };
        let mut flush = tokio::time::interval(self.config.flush_interval);
        flush.tick().await;
        loop {
            flush.tick().await;
            if self.manual_disconnect.load(Ordering::SeqCst) {
                return;
            }
            if self.state().await == ConnectionState::Registered {
                continue;
            }
            for event in self.bus.dequeue_all() {
                persist.enqueue(event);
            }
        }
    }

    async fn flush_once(&self, session: &mut BridgeSession) -> Result<(), SessionError> {
        let batch = self.bus.peek(self.config.batch_size);
        if batch.is_empty() {
            return Ok(());
        }
        match session.send(&BridgeMessage::Events(batch.clone())).await {
            Ok(()) => {
                self.bus.remove_first(batch.len());
                Ok(())
            }
            Err(e) => {
                // The send failed; park whatever is still queued to disk so
                // it survives the reconnect rather than being lost to the
                // bounded bus's drop policy.
                if let Some(persist) = &self.persist {
                    for event in self.bus.dequeue_all() {
                        persist.enqueue(event);
                    }
                }
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        session: &mut BridgeSession,
        msg: BridgeMessage,
    ) -> Result<(), SessionError> {
        match msg {
            BridgeMessage::ToggleCapture(p) => {
                let _ = self.events.send(BridgeEvent::ToggleCapture {
                    network: p.network,
                    log: p.log,
                });
            }
            BridgeMessage::UpdateMockRules(rules) => self.mock.update_rules(rules),
            BridgeMessage::UpdateBreakpointRules(rules) => self.breakpoints.update_rules(rules),
            BridgeMessage::UpdateChaosRules(rules) => self.chaos.update_rules(rules),
            BridgeMessage::BreakpointResume(p) => self.resume_breakpoint(p),
            BridgeMessage::ReplayRequest(p) => self.replay(p).await,
            BridgeMessage::DbCommand(p) => {
                let response = self.handle_db_command(p).await;
                session.send(&BridgeMessage::DbResponse(response)).await?;
            }
            BridgeMessage::Error(e) => {
                warn!(code = e.code, message = %e.message, "hub reported an error");
            }
            BridgeMessage::Registered(_) | BridgeMessage::Heartbeat => {}
            other => debug!(?other, "ignoring frame not expected from the hub"),
        }
        Ok(())
    }

    fn resume_breakpoint(&self, p: BreakpointResumePayload) {
        let action = match p.action {
            BreakpointAction::Continue | BreakpointAction::Resume => WireResumeAction::Resume,
            BreakpointAction::Abort => WireResumeAction::Abort,
            BreakpointAction::Modify => match (&p.modified_response, &p.modified_request) {
                (Some(snapshot), _) => WireResumeAction::ModifyResponse(snapshot.to_response()),
                (None, Some(snapshot)) => WireResumeAction::ModifyRequest(snapshot.to_request()),
                (None, None) => WireResumeAction::Resume,
            },
            BreakpointAction::MockResponse => {
                match p.modified_response.as_ref().or(p.modified_request.as_ref()) {
                    Some(snapshot) => WireResumeAction::MockResponse(snapshot.to_response()),
                    None => WireResumeAction::Resume,
                }
            }
        };
        self.breakpoints.resolve(&p.request_id, action);
    }

    /// Execute a replayed request through a clean, uninstrumented capture
    /// and discard the response — replay exists to reproduce a side effect,
    /// not to report one.
    async fn replay(&self, p: ReplayRequestPayload) {
        let Some(capture) = &self.replay_capture else {
            warn!(request_id = %p.id, "replay requested but no replay capture is configured");
            return;
        };
        let body = p
            .body
            .as_deref()
            .and_then(|b| base64::engine::general_purpose::STANDARD.decode(b).ok());
        let request = HttpRequest {
            method: p.method,
            url: p.url,
            headers: p.headers,
            body,
        };
        if let Err(e) = capture.on_request(request).await {
            debug!(error = %e, request_id = %p.id, "replay request failed; response is discarded regardless");
        }
    }

    async fn handle_db_command(&self, cmd: DbCommandPayload) -> DbResponsePayload {
        let request_id = cmd.request_id.clone();
        match &self.db {
            Some(db) => db.handle(cmd).await,
            None => DbResponsePayload {
                request_id,
                success: false,
                payload: None,
                error: Some("database inspection is not available on this probe".to_owned()),
            },
        }
    }
}
