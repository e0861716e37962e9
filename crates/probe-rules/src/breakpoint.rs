//! Breakpoint engine: suspends a request/response in flight until the hub
//! sends a resume command, or a timeout elapses.
//!
//! Per-request continuations are an explicit keyed map of `oneshot` senders
//! rather than a callback table, per the design note that mutable
//! continuation state should be made visible as ordinary owned values
//! instead of hidden in a singleton.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use probe_protocol::{BreakpointRule, HttpRequest, HttpResponse};
use tokio::sync::{broadcast, oneshot};

use crate::pattern;
use crate::snapshot::RuleSnapshot;

#[derive(Debug, Clone)]
pub enum RequestBreakpointAction {
    Resume,
    Modify(HttpRequest),
    Abort,
    MockResponse(HttpResponse),
}

#[derive(Debug, Clone)]
pub enum ResponseBreakpointAction {
    Resume,
    Modify(HttpResponse),
    Abort,
    MockResponse(HttpResponse),
}

/// Emitted whenever a breakpoint suspends a request, for the bridge to
/// forward to the hub as a `breakpointHit` frame.
#[derive(Debug, Clone)]
pub struct BreakpointHit {
    pub rule_id: String,
    pub request_id: String,
    pub phase: &'static str,
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
}

enum PendingAction {
    Request(RequestBreakpointAction),
    Response(ResponseBreakpointAction),
}

/// A hub-issued resume action, decoded from the wire before it is known
/// whether the pending continuation is a request- or response-phase one.
/// [`BreakpointEngine::resolve`] maps it onto whichever phase is actually
/// waiting for `request_id`.
#[derive(Debug, Clone)]
pub enum WireResumeAction {
    Resume,
    Abort,
    ModifyRequest(HttpRequest),
    ModifyResponse(HttpResponse),
    MockResponse(HttpResponse),
}

enum PendingSlot {
    Request(oneshot::Sender<PendingAction>),
    Response(oneshot::Sender<PendingAction>),
}

pub struct BreakpointEngine {
    rules: RuleSnapshot<BreakpointRule>,
    pending: Mutex<HashMap<String, PendingSlot>>,
    hits: broadcast::Sender<BreakpointHit>,
    timeout: Duration,
}

impl BreakpointEngine {
    pub fn new(timeout: Duration) -> Self {
        let (hits, _rx) = broadcast::channel(256);
        BreakpointEngine {
            rules: RuleSnapshot::new(),
            pending: Mutex::new(HashMap::new()),
            hits,
            timeout,
        }
    }

    pub fn update_rules(&self, rules: Vec<BreakpointRule>) {
        self.rules.replace(rules, |r| r.priority);
    }

    pub fn get_rules(&self) -> Vec<BreakpointRule> {
        self.rules.current().as_ref().clone()
    }

    pub fn add_rule(&self, rule: BreakpointRule) {
        let mut rules = self.rules.current().as_ref().clone();
        rules.push(rule);
        self.rules.replace(rules, |r| r.priority);
    }

    pub fn remove_rule(&self, id: &str) {
        let mut rules = self.rules.current().as_ref().clone();
        rules.retain(|r| r.id != id);
        self.rules.replace(rules, |r| r.priority);
    }

    pub fn clear_rules(&self) {
        self.rules.replace(Vec::new(), |r: &BreakpointRule| r.priority);
    }

    pub fn subscribe_hits(&self) -> broadcast::Receiver<BreakpointHit> {
        self.hits.subscribe()
    }

    fn matching_rule(
        &self,
        url: &str,
        method: &str,
        phase: probe_protocol::BreakpointPhase,
    ) -> Option<BreakpointRule> {
        use probe_protocol::BreakpointPhase as P;
        self.rules.current().iter().find_map(|rule| {
            if !rule.enabled {
                return None;
            }
            if rule.phase != phase && rule.phase != P::Both {
                return None;
            }
            if let Some(pattern) = &rule.url_pattern {
                if !pattern::matches(pattern, url) {
                    return None;
                }
            }
            if let Some(m) = &rule.method {
                if !m.eq_ignore_ascii_case(method) {
                    return None;
                }
            }
            Some(rule.clone())
        })
    }

    pub async fn check_request_breakpoint(
        &self,
        request_id: &str,
        request: &HttpRequest,
    ) -> RequestBreakpointAction {
        let Some(rule) = self.matching_rule(&request.url, &request.method, probe_protocol::BreakpointPhase::Request)
        else {
            return RequestBreakpointAction::Resume;
        };

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(request_id.to_owned(), PendingSlot::Request(tx));

        let _ = self.hits.send(BreakpointHit {
            rule_id: rule.id.clone(),
            request_id: request_id.to_owned(),
            phase: "request",
            request: request.clone(),
            response: None,
        });

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(PendingAction::Request(action))) => action,
            Ok(Ok(PendingAction::Response(_))) => RequestBreakpointAction::Resume,
            Ok(Err(_)) | Err(_) => {
                self.pending.lock().unwrap().remove(request_id);
                RequestBreakpointAction::Resume
            }
        }
    }

    pub fn has_response_breakpoint(&self, url: &str, method: &str) -> bool {
        self.matching_rule(url, method, probe_protocol::BreakpointPhase::Response)
            .is_some()
    }

    pub async fn check_response_breakpoint(
        &self,
        request_id: &str,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> ResponseBreakpointAction {
        let Some(rule) = self.matching_rule(&request.url, &request.method, probe_protocol::BreakpointPhase::Response)
        else {
            return ResponseBreakpointAction::Resume;
        };

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(request_id.to_owned(), PendingSlot::Response(tx));

        let _ = self.hits.send(BreakpointHit {
            rule_id: rule.id.clone(),
            request_id: request_id.to_owned(),
            phase: "response",
            request: request.clone(),
            response: Some(response.clone()),
        });

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(PendingAction::Response(action))) => action,
            Ok(Ok(PendingAction::Request(_))) => ResponseBreakpointAction::Resume,
            Ok(Err(_)) | Err(_) => {
                self.pending.lock().unwrap().remove(request_id);
                ResponseBreakpointAction::Resume
            }
        }
    }

    /// Resolve a pending request-phase continuation. No-op if the
    /// continuation already timed out, doesn't exist, or is waiting on the
    /// other phase.
    pub fn resume_request(&self, request_id: &str, action: RequestBreakpointAction) {
        if let Some(PendingSlot::Request(tx)) = self.pending.lock().unwrap().remove(request_id) {
            let _ = tx.send(PendingAction::Request(action));
        }
    }

    pub fn resume_response(&self, request_id: &str, action: ResponseBreakpointAction) {
        if let Some(PendingSlot::Response(tx)) = self.pending.lock().unwrap().remove(request_id) {
            let _ = tx.send(PendingAction::Response(action));
        }
    }

    /// Resolve a hub-issued resume, dispatching to whichever phase is
    /// actually pending for `request_id`. Used by the bridge client, which
    /// only sees a `breakpointResume` frame and not which phase it answers.
    pub fn resolve(&self, request_id: &str, action: WireResumeAction) {
        let slot = self.pending.lock().unwrap().remove(request_id);
        match slot {
            Some(PendingSlot::Request(tx)) => {
                let resolved = match action {
                    WireResumeAction::Resume => RequestBreakpointAction::Resume,
                    WireResumeAction::Abort => RequestBreakpointAction::Abort,
                    WireResumeAction::ModifyRequest(r) => RequestBreakpointAction::Modify(r),
                    WireResumeAction::ModifyResponse(_) => RequestBreakpointAction::Resume,
                    WireResumeAction::MockResponse(r) => RequestBreakpointAction::MockResponse(r),
                };
                let _ = tx.send(PendingAction::Request(resolved));
            }
            Some(PendingSlot::Response(tx)) => {
                let resolved = match action {
                    WireResumeAction::Resume => ResponseBreakpointAction::Resume,
                    WireResumeAction::Abort => ResponseBreakpointAction::Abort,
                    WireResumeAction::ModifyResponse(r) => ResponseBreakpointAction::Modify(r),
                    WireResumeAction::ModifyRequest(_) => ResponseBreakpointAction::Resume,
                    WireResumeAction::MockResponse(r) => ResponseBreakpointAction::MockResponse(r),
                };
                let _ = tx.send(PendingAction::Response(resolved));
            }
            None => {}
        }
    }

    /// Cancel a pending continuation (the outer request was dropped).
    pub fn cancel(&self, request_id: &str) {
        self.pending.lock().unwrap().remove(request_id);
    }
}
