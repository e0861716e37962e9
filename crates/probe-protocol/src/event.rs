//! Captured debug events.
//!
//! Mirrors the tagged-union event model the probe reports to the hub. Every
//! event carries a stable `id` and a timestamp; events are immutable once
//! constructed.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// A single captured observation, produced by capture sites and consumed by
/// the event bus.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DebugEvent {
    Http(HttpEvent),
    WebSocket(WsEvent),
    Log(LogEvent),
    /// Reserved for future aggregate-stats reporting. No capture site
    /// currently produces this variant.
    Stats(StatsEvent),
}

impl DebugEvent {
    pub fn id(&self) -> Uuid {
        match self {
            DebugEvent::Http(e) => e.id,
            DebugEvent::WebSocket(e) => e.id,
            DebugEvent::Log(e) => e.id,
            DebugEvent::Stats(e) => e.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DebugEvent::Http(e) => e.timestamp,
            DebugEvent::WebSocket(e) => e.timestamp,
            DebugEvent::Log(e) => e.timestamp,
            DebugEvent::Stats(e) => e.timestamp,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
    pub duration_ms: Option<u64>,
    pub mocked: bool,
    pub matched_rule_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WsEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub kind: WsEventKind,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEventKind {
    SessionCreated {
        url: String,
        request_headers: HashMap<String, String>,
        subprotocols: Vec<String>,
    },
    SessionClosed {
        close_code: Option<u16>,
        close_reason: Option<String>,
    },
    Frame {
        direction: WsDirection,
        opcode: WsOpcode,
        payload: Vec<u8>,
        is_mocked: bool,
        mock_rule_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsDirection {
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsOpcode {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
    Continuation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEvent {
    pub id: Uuid,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub subsystem: Option<String>,
    pub category: Option<String>,
    /// Opaque thread identifier; no schema is assumed beyond string equality.
    pub thread: String,
    pub file: String,
    pub function: String,
    pub line: u32,
    pub message: String,
    pub tags: Vec<String>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StatsEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub counters: HashMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_event_round_trips() {
        let event = DebugEvent::Http(HttpEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            request: HttpRequest {
                method: "GET".to_owned(),
                url: "https://api.example.com/v1/ping".to_owned(),
                headers: HashMap::new(),
                body: None,
            },
            response: Some(HttpResponse {
                status_code: 200,
                headers: HashMap::new(),
                body: Some(b"pong".to_vec()),
            }),
            duration_ms: Some(42),
            mocked: false,
            matched_rule_id: None,
        });
        let json = serde_json::to_string(&event).unwrap();
        let parsed: DebugEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id(), event.id());
    }

    #[test]
    fn log_event_tags_round_trip() {
        let event = LogEvent {
            id: Uuid::new_v4(),
            source: "app".to_owned(),
            timestamp: Utc::now(),
            level: LogLevel::Warning,
            subsystem: Some("net".to_owned()),
            category: None,
            thread: "main".to_owned(),
            file: "app.rs".to_owned(),
            function: "run".to_owned(),
            line: 10,
            message: "slow request".to_owned(),
            tags: vec!["perf".to_owned()],
            trace_id: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: LogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.message, "slow request");
        assert_eq!(parsed.level, LogLevel::Warning);
    }
}
