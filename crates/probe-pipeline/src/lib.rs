//! The traffic interception pipeline (C5): the request/response state
//! machine that applies breakpoints, mocks, and chaos to every captured
//! request, plus the frame-level WebSocket path.

pub mod capture;
pub mod pipeline;
pub mod state;
pub mod ws;

pub use capture::{Capture, CaptureError};
pub use pipeline::{FailureReason, Pipeline, PipelineOutcome};
pub use state::{IllegalTransition, PipelineState, StateMachine};
pub use ws::WsPipeline;
