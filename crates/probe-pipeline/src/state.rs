//! The per-request interception state machine.
//!
//! Transitions are explicit and one-directional; an illegal move is a
//! programming error in the pipeline, not a recoverable condition, so it is
//! surfaced as an `Err` rather than silently clamped.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Captured,
    ChaosDropped,
    /// Terminal state for a chaos-injected timeout, connection reset, or
    /// synthetic error response — a request-phase chaos failure.
    ChaosFailed,
    Delaying,
    PendingRequestBreak,
    Mocking,
    InFlight,
    /// Terminal state for a real `Capture::on_request` failure (not
    /// chaos-induced).
    NetworkFailed,
    PendingResponseBreak,
    ChaosCorrupted,
    Reported,
    Aborted,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Reported
                | PipelineState::Aborted
                | PipelineState::ChaosDropped
                | PipelineState::ChaosFailed
                | PipelineState::NetworkFailed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal pipeline transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

fn allowed(from: PipelineState, to: PipelineState) -> bool {
    use PipelineState::*;
    matches!(
        (from, to),
        (Captured, ChaosDropped)
            | (Captured, ChaosFailed)
            | (Captured, Delaying)
            | (Captured, PendingRequestBreak)
            | (Delaying, PendingRequestBreak)
            | (PendingRequestBreak, Aborted)
            | (PendingRequestBreak, Mocking)
            | (Mocking, InFlight)
            | (Mocking, PendingResponseBreak)
            | (InFlight, PendingResponseBreak)
            | (InFlight, NetworkFailed)
            | (PendingResponseBreak, Aborted)
            | (PendingResponseBreak, ChaosCorrupted)
            | (PendingResponseBreak, Reported)
            | (ChaosCorrupted, Reported)
    )
}

/// A request's state machine. Owns only the current state; the pipeline
/// itself owns the request/response data.
pub struct StateMachine {
    current: PipelineState,
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            current: PipelineState::Captured,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.current
    }

    pub fn transition(&mut self, to: PipelineState) -> Result<(), IllegalTransition> {
        if !allowed(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }
        self.current = to;
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
