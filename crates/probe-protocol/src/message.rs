//! The framed JSON-over-WebSocket protocol between probe and hub.
//!
//! Mirrors `rt_protocol::WsMessage`'s tagged-enum shape, adjacently tagged as
//! `{ "type": <tag>, "payload": <value> }` rather than flatly tagged, to match
//! the hub's existing wire format.

use crate::event::{DebugEvent, HttpRequest, HttpResponse};
use crate::rules::{BreakpointRule, ChaosRule, MockRule};
use base64::Engine as _;
use std::collections::HashMap;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeviceInfo {
    pub platform: String,
    pub os_version: String,
    pub app_version: String,
    pub device_model: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RegisterPayload {
    pub device_info: DeviceInfo,
    pub token: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RegisteredPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToggleCapturePayload {
    pub network: bool,
    pub log: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RequestExportPayload {
    pub time_from: String,
    pub time_to: String,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReplayRequestPayload {
    pub id: String,
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl HttpSnapshot {
    /// Encode a captured request as a full-override snapshot, base64-encoding
    /// the body the way the wire format requires.
    pub fn from_request(req: &HttpRequest) -> Self {
        HttpSnapshot {
            method: Some(req.method.clone()),
            url: Some(req.url.clone()),
            status_code: None,
            headers: req.headers.clone(),
            body: req
                .body
                .as_deref()
                .map(|b| base64::engine::general_purpose::STANDARD.encode(b)),
        }
    }

    pub fn from_response(resp: &HttpResponse) -> Self {
        HttpSnapshot {
            method: None,
            url: None,
            status_code: Some(resp.status_code),
            headers: resp.headers.clone(),
            body: resp
                .body
                .as_deref()
                .map(|b| base64::engine::general_purpose::STANDARD.encode(b)),
        }
    }

    /// Decode a hub-supplied snapshot into a complete request, defaulting any
    /// field the hub left unset. A malformed body decodes to `None` rather
    /// than failing the whole resume.
    pub fn to_request(&self) -> HttpRequest {
        HttpRequest {
            method: self.method.clone().unwrap_or_else(|| "GET".to_owned()),
            url: self.url.clone().unwrap_or_default(),
            headers: self.headers.clone(),
            body: self
                .body
                .as_deref()
                .and_then(|b| base64::engine::general_purpose::STANDARD.decode(b).ok()),
        }
    }

    pub fn to_response(&self) -> HttpResponse {
        HttpResponse {
            status_code: self.status_code.unwrap_or(200),
            headers: self.headers.clone(),
            body: self
                .body
                .as_deref()
                .and_then(|b| base64::engine::general_purpose::STANDARD.decode(b).ok()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakpointAction {
    #[serde(rename = "continue")]
    Continue,
    Resume,
    Abort,
    Modify,
    MockResponse,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BreakpointResumePayload {
    pub breakpoint_id: String,
    pub request_id: String,
    pub action: BreakpointAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_request: Option<HttpSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_response: Option<HttpSnapshot>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BreakpointHitPayload {
    pub breakpoint_id: String,
    pub request_id: String,
    pub phase: String,
    pub timestamp: String,
    pub request: HttpSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DbCommandKind {
    ListDatabases,
    ListTables,
    DescribeTable,
    FetchTablePage,
    ExecuteQuery,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DbCommandPayload {
    pub request_id: String,
    pub kind: DbCommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default)]
    pub ascending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DbResponsePayload {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
}

/// Every frame exchanged with the hub, adjacently tagged as
/// `{ "type": ..., "payload": ... }`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum BridgeMessage {
    Register(RegisterPayload),
    Heartbeat,
    Events(Vec<DebugEvent>),
    BreakpointHit(BreakpointHitPayload),
    Registered(RegisteredPayload),
    ToggleCapture(ToggleCapturePayload),
    UpdateMockRules(Vec<MockRule>),
    RequestExport(RequestExportPayload),
    ReplayRequest(ReplayRequestPayload),
    UpdateBreakpointRules(Vec<BreakpointRule>),
    BreakpointResume(BreakpointResumePayload),
    UpdateChaosRules(Vec<ChaosRule>),
    DbCommand(DbCommandPayload),
    DbResponse(DbResponsePayload),
    Error(ErrorPayload),
}
