//! Atomically-swapped rule snapshots.
//!
//! Rule lists are replaced wholesale on update and re-sorted by descending
//! priority immediately. Readers clone the current `Arc` under a brief read
//! lock and then match against it lock-free, so the pipeline's fast path
//! never contends with a concurrent rule update.

use std::sync::{Arc, RwLock};

pub struct RuleSnapshot<R> {
    inner: RwLock<Arc<Vec<R>>>,
}

impl<R> RuleSnapshot<R> {
    pub fn new() -> Self {
        RuleSnapshot {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn current(&self) -> Arc<Vec<R>> {
        Arc::clone(&self.inner.read().unwrap())
    }

    pub fn get(&self, id_of: impl Fn(&R) -> &str, id: &str) -> Option<usize>
    where
        R: Clone,
    {
        self.current().iter().position(|r| id_of(r) == id)
    }
}

impl<R> RuleSnapshot<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// Replace the entire list, sorted by descending priority (ties keep
    /// their input order, i.e. a stable sort).
    pub fn replace(&self, mut rules: Vec<R>, priority_of: impl Fn(&R) -> i32) {
        rules.sort_by(|a, b| priority_of(b).cmp(&priority_of(a)));
        *self.inner.write().unwrap() = Arc::new(rules);
    }
}

impl<R> Default for RuleSnapshot<R> {
    fn default() -> Self {
        Self::new()
    }
}
