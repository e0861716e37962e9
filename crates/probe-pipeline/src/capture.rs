//! The platform hook boundary.
//!
//! Real method interception of the host's HTTP/WebSocket stack is
//! necessarily platform-specific and is not implemented here; instead the
//! pipeline consumes a small trait the host implements once. This crate
//! ships one in-memory implementation for tests
//! (`probe-test-utils::RecordingCapture`), not a production one.

use probe_protocol::{HttpRequest, HttpResponse};

#[derive(Debug, Clone)]
pub enum CaptureError {
    Timeout,
    ConnectionReset,
    Other(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::Timeout => write!(f, "request timed out"),
            CaptureError::ConnectionReset => write!(f, "connection reset"),
            CaptureError::Other(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// The host-supplied bridge to the real network/WebSocket stack.
#[async_trait::async_trait]
pub trait Capture: Send + Sync {
    /// Perform the real (possibly mock/breakpoint-modified) HTTP request and
    /// return the real response.
    async fn on_request(&self, request: HttpRequest) -> Result<HttpResponse, CaptureError>;

    /// Send a (possibly mock-modified) outgoing WebSocket frame on `session_id`.
    async fn on_ws_frame(&self, session_id: uuid::Uuid, payload: Vec<u8>) -> Result<(), CaptureError>;
}
