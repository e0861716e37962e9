//! Shared wire types for the debug probe: the event model, rule definitions,
//! the hub protocol envelope, and the `debughub://` settings URL format.

pub mod event;
pub mod message;
pub mod rules;
pub mod settings_url;

pub use event::{
    DebugEvent, HttpEvent, HttpRequest, HttpResponse, LogEvent, LogLevel, StatsEvent, WsDirection,
    WsEvent, WsEventKind, WsOpcode,
};
pub use message::{
    BreakpointAction, BreakpointHitPayload, BreakpointResumePayload, BridgeMessage, DbCommandKind,
    DbCommandPayload, DbResponsePayload, DeviceInfo, ErrorPayload, HttpSnapshot,
    RegisterPayload, RegisteredPayload, ReplayRequestPayload, RequestExportPayload,
    ToggleCapturePayload,
};
pub use rules::{
    BreakpointPhase, BreakpointRule, ChaosKind, ChaosRule, MockAction, MockCondition, MockRule,
    MockTarget,
};
pub use settings_url::{HubSettings, SettingsUrlError};
