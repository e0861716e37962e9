//! The interception pipeline (C5): runs every captured HTTP request through
//! chaos, breakpoints, and mocks, in that order, then performs (or skips)
//! the real network call and runs the response side of the same checks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use probe_bus::EventBus;
use probe_protocol::{DebugEvent, HttpEvent, HttpRequest, HttpResponse};
use probe_rules::breakpoint::{RequestBreakpointAction, ResponseBreakpointAction};
use probe_rules::chaos::ChaosResult;
use probe_rules::{BreakpointEngine, ChaosEngine, MockRuleEngine};
use uuid::Uuid;

use crate::capture::{Capture, CaptureError};
use crate::state::{PipelineState, StateMachine};

#[derive(Debug, Clone)]
pub enum FailureReason {
    Dropped,
    Aborted,
    Timeout,
    ConnectionReset,
    Error(u16),
    Network(String),
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Response(HttpResponse),
    Failed(FailureReason),
}

pub struct Pipeline {
    mock: Arc<MockRuleEngine>,
    breakpoints: Arc<BreakpointEngine>,
    chaos: Arc<ChaosEngine>,
    bus: Arc<EventBus>,
}

impl Pipeline {
    pub fn new(
        mock: Arc<MockRuleEngine>,
        breakpoints: Arc<BreakpointEngine>,
        chaos: Arc<ChaosEngine>,
        bus: Arc<EventBus>,
    ) -> Self {
        Pipeline {
            mock,
            breakpoints,
            chaos,
            bus,
        }
    }

    pub async fn capture_http(
        &self,
        request: HttpRequest,
        capture: &dyn Capture,
    ) -> PipelineOutcome {
        let request_id = Uuid::new_v4();
        let started = std::time::Instant::now();
        let mut sm = StateMachine::new();
        let mut req = request;

        match self.chaos.evaluate(&req.url, &req.method) {
            ChaosResult::Drop => {
                sm.transition(PipelineState::ChaosDropped).ok();
                self.record(request_id, &req, None, started, false, None);
                return PipelineOutcome::Failed(FailureReason::Dropped);
            }
            ChaosResult::Timeout => {
                sm.transition(PipelineState::ChaosFailed).ok();
                self.record(request_id, &req, None, started, false, None);
                return PipelineOutcome::Failed(FailureReason::Timeout);
            }
            ChaosResult::ConnectionReset => {
                sm.transition(PipelineState::ChaosFailed).ok();
                self.record(request_id, &req, None, started, false, None);
                return PipelineOutcome::Failed(FailureReason::ConnectionReset);
            }
            ChaosResult::ErrorResponse(code) => {
                sm.transition(PipelineState::ChaosFailed).ok();
                self.record(request_id, &req, None, started, false, None);
                return PipelineOutcome::Failed(FailureReason::Error(code));
            }
            ChaosResult::Delay(ms) => {
                sm.transition(PipelineState::Delaying).ok();
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            ChaosResult::CorruptedData(_) | ChaosResult::None => {}
        }

        let _ = sm.transition(PipelineState::PendingRequestBreak);

        let mut pre_network_response: Option<HttpResponse> = None;
        let mut matched_rule_id: Option<String> = None;

        match self.breakpoints.check_request_breakpoint(&request_id.to_string(), &req).await {
            RequestBreakpointAction::Resume => {}
            RequestBreakpointAction::Modify(modified) => req = modified,
            RequestBreakpointAction::Abort => {
                let _ = sm.transition(PipelineState::Aborted);
                self.record(request_id, &req, None, started, false, None);
                return PipelineOutcome::Failed(FailureReason::Aborted);
            }
            RequestBreakpointAction::MockResponse(resp) => {
                pre_network_response = Some(resp);
            }
        }

        let _ = sm.transition(PipelineState::Mocking);
        if pre_network_response.is_none() {
            let (modified_req, mock_resp, rule_id) = self.mock.process_http_request(req);
            req = modified_req;
            if let Some(resp) = mock_resp {
                pre_network_response = Some(resp);
                matched_rule_id = rule_id;
            }
        }

        let mut response = if let Some(resp) = pre_network_response {
            resp
        } else {
            let _ = sm.transition(PipelineState::InFlight);
            match capture.on_request(req.clone()).await {
                Ok(resp) => resp,
                Err(e) => {
                    let _ = sm.transition(PipelineState::NetworkFailed);
                    self.record(request_id, &req, None, started, false, None);
                    return PipelineOutcome::Failed(match e {
                        CaptureError::Timeout => FailureReason::Timeout,
                        CaptureError::ConnectionReset => FailureReason::ConnectionReset,
                        CaptureError::Other(s) => FailureReason::Network(s),
                    });
                }
            }
        };

        let mocked = matched_rule_id.is_some();
        let _ = sm.transition(PipelineState::PendingResponseBreak);

        if self.breakpoints.has_response_breakpoint(&req.url, &req.method) {
            match self
                .breakpoints
                .check_response_breakpoint(&request_id.to_string(), &req, &response)
                .await
            {
                ResponseBreakpointAction::Resume => {}
                ResponseBreakpointAction::Modify(modified) => response = modified,
                ResponseBreakpointAction::Abort => {
                    let _ = sm.transition(PipelineState::Aborted);
                    let aborted_response = HttpResponse {
                        status_code: 0,
                        headers: Default::default(),
                        body: None,
                    };
                    self.record(request_id, &req, Some(aborted_response), started, mocked, matched_rule_id);
                    return PipelineOutcome::Failed(FailureReason::Aborted);
                }
                ResponseBreakpointAction::MockResponse(resp) => response = resp,
            }
        }

        if let Some(body) = &response.body {
            if let Some(corrupted) = self.chaos.evaluate_response(&req.url, &req.method, body) {
                let _ = sm.transition(PipelineState::ChaosCorrupted);
                response.body = Some(corrupted);
            }
        }

        let _ = sm.transition(PipelineState::Reported);
        self.record(request_id, &req, Some(response.clone()), started, mocked, matched_rule_id);
        PipelineOutcome::Response(response)
    }

    fn record(
        &self,
        id: Uuid,
        request: &HttpRequest,
        response: Option<HttpResponse>,
        started: std::time::Instant,
        mocked: bool,
        matched_rule_id: Option<String>,
    ) {
        let event = DebugEvent::Http(HttpEvent {
            id,
            timestamp: Utc::now(),
            request: request.clone(),
            response,
            duration_ms: Some(started.elapsed().as_millis() as u64),
            mocked,
            matched_rule_id,
        });
        self.bus.enqueue(event);
    }
}
