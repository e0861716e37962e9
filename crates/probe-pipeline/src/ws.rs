//! WebSocket session and frame interception (the WS half of C5).
//!
//! Session open/close are recorded directly; every frame is run through the
//! mock engine (only — no breakpoints or chaos apply to the WS path per the
//! spec) before being recorded as a `Frame` event with `is_mocked` and
//! `mock_rule_id` set from the match, if any.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use probe_bus::EventBus;
use probe_protocol::{DebugEvent, WsDirection, WsEvent, WsEventKind, WsOpcode};
use probe_rules::MockRuleEngine;
use uuid::Uuid;

use crate::capture::{Capture, CaptureError};

struct SessionInfo {
    url: String,
}

/// Tracks the open WebSocket sessions the pipeline has recorded, keyed by
/// `session_id`, so a later frame can look up the URL its mock condition
/// should match against.
struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionInfo>>,
}

impl SessionRegistry {
    fn new() -> Self {
        SessionRegistry {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, id: Uuid, url: String) {
        self.sessions.lock().unwrap().insert(id, SessionInfo { url });
    }

    fn url_of(&self, id: Uuid) -> String {
        self.sessions
            .lock()
            .unwrap()
            .get(&id)
            .map(|s| s.url.clone())
            .unwrap_or_default()
    }

    fn remove(&self, id: Uuid) {
        self.sessions.lock().unwrap().remove(&id);
    }
}

/// The WebSocket half of the interception pipeline, consulting the mock
/// engine on every frame and recording session/frame events on the bus.
pub struct WsPipeline {
    mock: Arc<MockRuleEngine>,
    bus: Arc<EventBus>,
    sessions: SessionRegistry,
}

impl WsPipeline {
    pub fn new(mock: Arc<MockRuleEngine>, bus: Arc<EventBus>) -> Self {
        WsPipeline {
            mock,
            bus,
            sessions: SessionRegistry::new(),
        }
    }

    /// Record a session open and return the `session_id` assigned to it.
    pub fn open_session(
        &self,
        url: String,
        request_headers: std::collections::HashMap<String, String>,
        subprotocols: Vec<String>,
    ) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions.insert(session_id, url.clone());
        self.bus.enqueue(DebugEvent::WebSocket(WsEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id,
            kind: WsEventKind::SessionCreated {
                url,
                request_headers,
                subprotocols,
            },
        }));
        session_id
    }

    /// Record a session close and stop tracking it.
    pub fn close_session(
        &self,
        session_id: Uuid,
        close_code: Option<u16>,
        close_reason: Option<String>,
    ) {
        self.bus.enqueue(DebugEvent::WebSocket(WsEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id,
            kind: WsEventKind::SessionClosed {
                close_code,
                close_reason,
            },
        }));
        self.sessions.remove(session_id);
    }

    /// Run an outgoing frame through the mock engine, send the effective
    /// payload via the host's `Capture::on_ws_frame`, and record the frame.
    pub async fn send_outgoing_frame(
        &self,
        session_id: Uuid,
        opcode: WsOpcode,
        payload: Vec<u8>,
        capture: &dyn Capture,
    ) -> Result<(), CaptureError> {
        let url = self.sessions.url_of(session_id);
        let (effective, rule_id) = match self.mock.process_ws_outgoing_frame(&payload, &url) {
            Some((replacement, rule_id)) => (replacement, Some(rule_id)),
            None => (payload, None),
        };

        capture.on_ws_frame(session_id, effective.clone()).await?;
        self.record_frame(session_id, WsDirection::Send, opcode, effective, rule_id);
        Ok(())
    }

    /// Run an incoming frame through the mock engine and return the
    /// effective payload the host should deliver to application code.
    pub fn receive_incoming_frame(
        &self,
        session_id: Uuid,
        opcode: WsOpcode,
        payload: Vec<u8>,
    ) -> Vec<u8> {
        let url = self.sessions.url_of(session_id);
        let (effective, rule_id) = match self.mock.process_ws_incoming_frame(&payload, &url) {
            Some((replacement, rule_id)) => (replacement, Some(rule_id)),
            None => (payload, None),
        };

        self.record_frame(session_id, WsDirection::Receive, opcode, effective.clone(), rule_id);
        effective
    }

    fn record_frame(
        &self,
        session_id: Uuid,
        direction: WsDirection,
        opcode: WsOpcode,
        payload: Vec<u8>,
        mock_rule_id: Option<String>,
    ) {
        self.bus.enqueue(DebugEvent::WebSocket(WsEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id,
            kind: WsEventKind::Frame {
                direction,
                opcode,
                payload,
                is_mocked: mock_rule_id.is_some(),
                mock_rule_id,
            },
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use probe_protocol::{MockAction, MockCondition, MockRule, MockTarget};
    use std::sync::Mutex as StdMutex;

    struct RecordingCapture {
        sent: StdMutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Capture for RecordingCapture {
        async fn on_request(
            &self,
            _request: probe_protocol::HttpRequest,
        ) -> Result<probe_protocol::HttpResponse, CaptureError> {
            unimplemented!("not exercised in WS tests")
        }

        async fn on_ws_frame(&self, _session_id: Uuid, payload: Vec<u8>) -> Result<(), CaptureError> {
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn outgoing_frame_without_rule_passes_through() {
        let bus = Arc::new(EventBus::new(100, probe_bus::DropPolicy::DropOldest));
        let mock = Arc::new(MockRuleEngine::new());
        let ws = WsPipeline::new(mock, bus.clone());
        let capture = RecordingCapture { sent: StdMutex::new(Vec::new()) };

        let session = ws.open_session("wss://x/socket".to_owned(), Default::default(), vec![]);
        ws.send_outgoing_frame(session, WsOpcode::Text, b"hello".to_vec(), &capture)
            .await
            .unwrap();

        assert_eq!(capture.sent.lock().unwrap().as_slice(), [b"hello".to_vec()]);
        assert_eq!(bus.len(), 2); // session created + frame
    }

    #[tokio::test]
    async fn outgoing_frame_replaced_by_mock_rule() {
        let bus = Arc::new(EventBus::new(100, probe_bus::DropPolicy::DropOldest));
        let mock = Arc::new(MockRuleEngine::new());
        mock.update_rules(vec![MockRule {
            id: "ws-1".to_owned(),
            name: "replace ping".to_owned(),
            target: MockTarget::WsOutgoing,
            condition: MockCondition {
                ws_payload_contains: Some("ping".to_owned()),
                ..Default::default()
            },
            action: MockAction {
                ws_replacement_payload: Some(b"pong".to_vec()),
                ..Default::default()
            },
            priority: 1,
            enabled: true,
        }]);
        let ws = WsPipeline::new(mock, bus);
        let capture = RecordingCapture { sent: StdMutex::new(Vec::new()) };

        let session = ws.open_session("wss://x/socket".to_owned(), Default::default(), vec![]);
        ws.send_outgoing_frame(session, WsOpcode::Text, b"ping".to_vec(), &capture)
            .await
            .unwrap();

        assert_eq!(capture.sent.lock().unwrap().as_slice(), [b"pong".to_vec()]);
    }

    #[test]
    fn incoming_frame_records_mock_rule_id() {
        let bus = Arc::new(EventBus::new(100, probe_bus::DropPolicy::DropOldest));
        let mock = Arc::new(MockRuleEngine::new());
        mock.update_rules(vec![MockRule {
            id: "ws-2".to_owned(),
            name: "replace incoming".to_owned(),
            target: MockTarget::WsIncoming,
            condition: MockCondition::default(),
            action: MockAction {
                ws_replacement_payload: Some(b"replaced".to_vec()),
                ..Default::default()
            },
            priority: 1,
            enabled: true,
        }]);
        let ws = WsPipeline::new(mock, bus.clone());

        let session = ws.open_session("wss://x/socket".to_owned(), Default::default(), vec![]);
        let effective = ws.receive_incoming_frame(session, WsOpcode::Binary, b"orig".to_vec());
        assert_eq!(effective, b"replaced".to_vec());

        let events = bus.peek(10);
        match &events[1] {
            DebugEvent::WebSocket(e) => match &e.kind {
                WsEventKind::Frame { is_mocked, mock_rule_id, .. } => {
                    assert!(is_mocked);
                    assert_eq!(mock_rule_id.as_deref(), Some("ws-2"));
                }
                other => panic!("unexpected kind: {other:?}"),
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
