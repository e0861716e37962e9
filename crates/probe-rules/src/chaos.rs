//! Chaos engine: probabilistic fault injection, evaluated per request and
//! (separately, for response corruption) per response.
//!
//! Matching follows the same priority-ordered, first-match-wins walk as
//! `emulator_v2::faults::apply_fault_to_event_emission`, generalized from a
//! fixed event-count trigger to a request condition plus a probability draw.

use probe_protocol::{ChaosKind, ChaosRule};
use rand::Rng;

use crate::pattern;
use crate::snapshot::RuleSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum ChaosResult {
    None,
    Delay(u64),
    Timeout,
    ConnectionReset,
    ErrorResponse(u16),
    CorruptedData(Vec<u8>),
    Drop,
}

pub struct ChaosEngine {
    rules: RuleSnapshot<ChaosRule>,
}

impl ChaosEngine {
    pub fn new() -> Self {
        ChaosEngine {
            rules: RuleSnapshot::new(),
        }
    }

    pub fn update_rules(&self, rules: Vec<ChaosRule>) {
        self.rules.replace(rules, |r| r.priority);
    }

    pub fn get_rules(&self) -> Vec<ChaosRule> {
        self.rules.current().as_ref().clone()
    }

    pub fn add_rule(&self, rule: ChaosRule) {
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
        self.rules.replace(Vec::new(), |r: &ChaosRule| r.priority);
    }

    pub fn evaluate(&self, url: &str, method: &str) -> ChaosResult {
        for rule in self.rules.current().iter() {
            if matches!(rule.chaos, ChaosKind::CorruptResponse) {
                continue;
            }
            if !rule.enabled || !condition_matches(rule, url, method) {
                continue;
            }
            if !draw(rule.probability) {
                continue;
            }
            return match &rule.chaos {
                ChaosKind::Latency { min_ms, max_ms } => {
                    ChaosResult::Delay(uniform(*min_ms, *max_ms))
                }
                ChaosKind::Timeout => ChaosResult::Timeout,
                ChaosKind::ConnectionReset => ChaosResult::ConnectionReset,
                ChaosKind::RandomError { codes } => {
                    if codes.is_empty() {
                        ChaosResult::ErrorResponse(500)
                    } else {
                        let idx = rand::thread_rng().gen_range(0..codes.len());
                        ChaosResult::ErrorResponse(codes[idx])
                    }
                }
                // slowNetwork's bps is accepted but not separately modeled;
                // it degrades to a flat delay like the other latency faults.
                ChaosKind::SlowNetwork { .. } => ChaosResult::Delay(uniform(1000, 5000)),
                ChaosKind::DropRequest => ChaosResult::Drop,
                ChaosKind::CorruptResponse => unreachable!("filtered above"),
            };
        }
        ChaosResult::None
    }

    /// Corrupt response bytes in place for the first matching
    /// `corruptResponse` rule. Flips roughly 1% of bytes (at least one) by
    /// XORing with `0xFF`, which is reversible in tests and never a no-op.
    pub fn evaluate_response(&self, url: &str, method: &str, body: &[u8]) -> Option<Vec<u8>> {
        for rule in self.rules.current().iter() {
            if !matches!(rule.chaos, ChaosKind::CorruptResponse) {
                continue;
            }
            if !rule.enabled || !condition_matches(rule, url, method) {
                continue;
            }
            if !draw(rule.probability) {
                continue;
            }
            return Some(corrupt_bytes(body));
        }
        None
    }
}

impl Default for ChaosEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn condition_matches(rule: &ChaosRule, url: &str, method: &str) -> bool {
    if let Some(pattern) = &rule.url_pattern {
        if !pattern::matches(pattern, url) {
            return false;
        }
    }
    if let Some(m) = &rule.method {
        if !m.eq_ignore_ascii_case(method) {
            return false;
        }
    }
    true
}

fn draw(probability: f64) -> bool {
    if probability >= 1.0 {
        return true;
    }
    if probability <= 0.0 {
        return false;
    }
    rand::thread_rng().gen_range(0.0..1.0) <= probability
}

fn uniform(min: u64, max: u64) -> u64 {
    if min >= max {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

fn corrupt_bytes(body: &[u8]) -> Vec<u8> {
    if body.is_empty() {
        return Vec::new();
    }
    let mut out = body.to_vec();
    let flip_count = ((out.len() as f64 * 0.01).ceil() as usize).max(1);
    let mut rng = rand::thread_rng();
    for _ in 0..flip_count {
        let idx = rng.gen_range(0..out.len());
        out[idx] ^= 0xFF;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(chaos: ChaosKind, probability: f64) -> ChaosRule {
        ChaosRule {
            id: "c1".to_owned(),
            name: "test".to_owned(),
            url_pattern: Some("*analytics*".to_owned()),
            method: None,
            probability,
            chaos,
            priority: 10,
            enabled: true,
        }
    }

    #[test]
    fn chaos_drop_scenario_fires_at_probability_one() {
        let engine = ChaosEngine::new();
        engine.update_rules(vec![rule(ChaosKind::DropRequest, 1.0)]);
        let result = engine.evaluate("https://x/analytics/y", "POST");
        assert_eq!(result, ChaosResult::Drop);
    }

    #[test]
    fn zero_probability_never_fires() {
        let engine = ChaosEngine::new();
        engine.update_rules(vec![rule(ChaosKind::DropRequest, 0.0)]);
        let result = engine.evaluate("https://x/analytics/y", "POST");
        assert_eq!(result, ChaosResult::None);
    }

    #[test]
    fn non_matching_url_never_fires() {
        let engine = ChaosEngine::new();
        engine.update_rules(vec![rule(ChaosKind::DropRequest, 1.0)]);
        let result = engine.evaluate("https://x/v1/ping", "GET");
        assert_eq!(result, ChaosResult::None);
    }

    #[test]
    fn corrupt_response_flips_at_least_one_byte() {
        let engine = ChaosEngine::new();
        engine.update_rules(vec![rule(ChaosKind::CorruptResponse, 1.0)]);
        let original = b"hello world".to_vec();
        let corrupted = engine
            .evaluate_response("https://x/analytics/y", "GET", &original)
            .unwrap();
        assert_eq!(corrupted.len(), original.len());
        assert_ne!(corrupted, original);
    }

    #[test]
    fn corrupt_response_rule_is_ignored_by_request_evaluate() {
        let engine = ChaosEngine::new();
        engine.update_rules(vec![rule(ChaosKind::CorruptResponse, 1.0)]);
        let result = engine.evaluate("https://x/analytics/y", "GET");
        assert_eq!(result, ChaosResult::None);
    }

    #[test]
    fn slow_network_degrades_to_flat_delay_range() {
        let engine = ChaosEngine::new();
        engine.update_rules(vec![rule(ChaosKind::SlowNetwork { bps: 500 }, 1.0)]);
        match engine.evaluate("https://x/analytics/y", "GET") {
            ChaosResult::Delay(ms) => assert!((1000..=5000).contains(&ms)),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
