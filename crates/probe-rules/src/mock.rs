//! Mock rule engine: rewrites requests/responses without touching the
//! network, and substitutes WebSocket frame payloads.

use probe_protocol::{HttpRequest, HttpResponse, MockAction, MockRule, MockTarget};

use crate::pattern;
use crate::snapshot::RuleSnapshot;

pub struct MockRuleEngine {
    rules: RuleSnapshot<MockRule>,
}

impl MockRuleEngine {
    pub fn new() -> Self {
        MockRuleEngine {
            rules: RuleSnapshot::new(),
        }
    }

    pub fn update_rules(&self, rules: Vec<MockRule>) {
        self.rules.replace(rules, |r| r.priority);
    }

    pub fn get_rules(&self) -> Vec<MockRule> {
        self.rules.current().as_ref().clone()
    }

    pub fn add_rule(&self, rule: MockRule) {
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
        self.rules.replace(Vec::new(), |r: &MockRule| r.priority);
    }

    /// Apply matching `httpRequest` rules cumulatively (header/body
    /// overrides compose), then stop at the first matching `httpResponse`
    /// rule and synthesize a mock response from it.
    pub fn process_http_request(
        &self,
        mut req: HttpRequest,
    ) -> (HttpRequest, Option<HttpResponse>, Option<String>) {
        let rules = self.rules.current();

        for rule in rules.iter() {
            if !rule.enabled || rule.target != MockTarget::HttpRequest {
                continue;
            }
            if condition_matches(rule, &req, None) {
                apply_request_overrides(&mut req, &rule.action);
            }
        }

        for rule in rules.iter() {
            if !rule.enabled || rule.target != MockTarget::HttpResponse {
                continue;
            }
            if condition_matches(rule, &req, None) {
                return (req, Some(synthesize_response(&rule.action)), Some(rule.id.clone()));
            }
        }

        (req, None, None)
    }

    pub fn process_ws_outgoing_frame(&self, payload: &[u8], url: &str) -> Option<(Vec<u8>, String)> {
        self.process_ws_frame(payload, url, MockTarget::WsOutgoing)
    }

    pub fn process_ws_incoming_frame(&self, payload: &[u8], url: &str) -> Option<(Vec<u8>, String)> {
        self.process_ws_frame(payload, url, MockTarget::WsIncoming)
    }

    fn process_ws_frame(
        &self,
        payload: &[u8],
        url: &str,
        target: MockTarget,
    ) -> Option<(Vec<u8>, String)> {
        let rules = self.rules.current();
        for rule in rules.iter() {
            if !rule.enabled || rule.target != target {
                continue;
            }
            if !rule
                .condition
                .url_pattern
                .as_deref()
                .is_none_or(|p| pattern::matches(p, url))
            {
                continue;
            }
            if let Some(substr) = &rule.condition.ws_payload_contains {
                let text = String::from_utf8_lossy(payload);
                if !text.contains(substr.as_str()) {
                    continue;
                }
            }
            if let Some(replacement) = &rule.action.ws_replacement_payload {
                return Some((replacement.clone(), rule.id.clone()));
            }
        }
        None
    }
}

impl Default for MockRuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn condition_matches(rule: &MockRule, req: &HttpRequest, status_code: Option<u16>) -> bool {
    let c = &rule.condition;
    if let Some(pattern) = &c.url_pattern {
        if !pattern::matches(pattern, &req.url) {
            return false;
        }
    }
    if let Some(method) = &c.method {
        if !method.eq_ignore_ascii_case(&req.method) {
            return false;
        }
    }
    if let Some(expected) = c.status_code {
        if status_code != Some(expected) {
            return false;
        }
    }
    for (k, v) in &c.header_contains {
        match req.headers.get(k) {
            Some(actual) if actual.contains(v.as_str()) => {}
            _ => return false,
        }
    }
    if let Some(substr) = &c.body_contains {
        let body_text = req
            .body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        if !body_text.contains(substr.as_str()) {
            return false;
        }
    }
    true
}

fn apply_request_overrides(req: &mut HttpRequest, action: &MockAction) {
    for (k, v) in &action.header_overrides {
        req.headers.insert(k.clone(), v.clone());
    }
    if let Some(body) = &action.body_override {
        req.body = Some(body.clone());
    }
}

fn synthesize_response(action: &MockAction) -> HttpResponse {
    HttpResponse {
        status_code: action.mock_response_status_code.unwrap_or(200),
        headers: action.mock_response_headers.clone(),
        body: action.mock_response_body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn req(url: &str) -> HttpRequest {
        HttpRequest {
            method: "GET".to_owned(),
            url: url.to_owned(),
            headers: HashMap::new(),
            body: None,
        }
    }

    #[test]
    fn mock_hit_scenario_returns_status_and_skips_network() {
        let engine = MockRuleEngine::new();
        engine.update_rules(vec![MockRule {
            id: "rule-1".to_owned(),
            name: "ping override".to_owned(),
            target: MockTarget::HttpResponse,
            condition: probe_protocol::MockCondition {
                url_pattern: Some("*/v1/ping".to_owned()),
                ..Default::default()
            },
            action: MockAction {
                mock_response_status_code: Some(418),
                ..Default::default()
            },
            priority: 10,
            enabled: true,
        }]);

        let (_req, response, rule_id) =
            engine.process_http_request(req("https://api.example.com/v1/ping"));
        let response = response.expect("expected mock response");
        assert_eq!(response.status_code, 418);
        assert_eq!(rule_id.as_deref(), Some("rule-1"));
    }

    #[test]
    fn higher_priority_rule_wins() {
        let engine = MockRuleEngine::new();
        engine.update_rules(vec![
            MockRule {
                id: "low".to_owned(),
                name: "low".to_owned(),
                target: MockTarget::HttpResponse,
                condition: probe_protocol::MockCondition {
                    url_pattern: Some("*".to_owned()),
                    ..Default::default()
                },
                action: MockAction {
                    mock_response_status_code: Some(200),
                    ..Default::default()
                },
                priority: 1,
                enabled: true,
            },
            MockRule {
                id: "high".to_owned(),
                name: "high".to_owned(),
                target: MockTarget::HttpResponse,
                condition: probe_protocol::MockCondition {
                    url_pattern: Some("*".to_owned()),
                    ..Default::default()
                },
                action: MockAction {
                    mock_response_status_code: Some(503),
                    ..Default::default()
                },
                priority: 100,
                enabled: true,
            },
        ]);

        let (_req, response, rule_id) = engine.process_http_request(req("https://x/y"));
        assert_eq!(response.unwrap().status_code, 503);
        assert_eq!(rule_id.as_deref(), Some("high"));
    }

    #[test]
    fn no_match_leaves_request_untouched() {
        let engine = MockRuleEngine::new();
        let (req_out, response, rule_id) = engine.process_http_request(req("https://x/y"));
        assert!(response.is_none());
        assert!(rule_id.is_none());
        assert_eq!(req_out.url, "https://x/y");
    }
}
