//! URL/payload pattern matching shared by the three rule engines.
//!
//! A pattern is a regex iff it starts with `^` or ends with `$`; otherwise a
//! `*`-glob if it contains `*`; otherwise a plain substring match. A pattern
//! that fails to compile as a regex is treated as non-matching rather than
//! raised, per the design note that rule-language errors must never be
//! fatal on the pipeline's fast path.

use regex::Regex;

pub fn matches(pattern: &str, candidate: &str) -> bool {
    if pattern.starts_with('^') || pattern.ends_with('$') {
        return Regex::new(pattern)
            .map(|re| re.is_match(candidate))
            .unwrap_or(false);
    }
    if pattern.contains('*') {
        let escaped = regex::escape(pattern).replace("\\*", ".*");
        let anchored = format!("^{escaped}$");
        return Regex::new(&anchored)
            .map(|re| re.is_match(candidate))
            .unwrap_or(false);
    }
    candidate.contains(pattern)
}
