//! Rule types shared between the wire protocol and the rule engines.
//!
//! These are plain data; matching and evaluation live in `probe-rules`.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MockTarget {
    HttpRequest,
    HttpResponse,
    WsOutgoing,
    WsIncoming,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MockCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub header_contains: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_payload_contains: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MockAction {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub header_overrides: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_override: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_response_status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mock_response_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_response_body: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_replacement_payload: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MockRule {
    pub id: String,
    pub name: String,
    pub target: MockTarget,
    #[serde(default)]
    pub condition: MockCondition,
    #[serde(default)]
    pub action: MockAction,
    pub priority: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakpointPhase {
    Request,
    Response,
    Both,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BreakpointRule {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub phase: BreakpointPhase,
    pub priority: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChaosKind {
    Latency { min_ms: u64, max_ms: u64 },
    Timeout,
    ConnectionReset,
    RandomError { codes: Vec<u16> },
    CorruptResponse,
    SlowNetwork { bps: u64 },
    DropRequest,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChaosRule {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub probability: f64,
    pub chaos: ChaosKind,
    pub priority: i32,
    pub enabled: bool,
}
