//! The bounded in-memory event bus (C2).
//!
//! A single `std::sync::Mutex`-guarded queue, modeled on
//! `rt_ui_log::UiLogger`'s buffer and `forwarder::local_fanout`'s
//! broadcast-after-unlock discipline: subscriber notification happens after
//! the lock is released so a subscriber callback can never deadlock against
//! a concurrent bus operation.

use std::collections::VecDeque;
use std::sync::Mutex;

use probe_protocol::DebugEvent;
use rand::Rng;
use tokio::sync::broadcast;

/// What happens to new events once the bus is at `max_buffer_size`.
#[derive(Debug, Clone, Copy)]
pub enum DropPolicy {
    DropOldest,
    DropNewest,
    /// Retain a uniformly random `rate` fraction of incoming events (0,1].
    Sample(f64),
}

struct Inner {
    queue: VecDeque<DebugEvent>,
    max_buffer_size: usize,
    drop_policy: DropPolicy,
}

/// The bounded event bus. Cheap to clone (shares an `Arc` internally via
/// the broadcast sender); typically held as a single instance by the
/// lifecycle controller.
pub struct EventBus {
    inner: Mutex<Inner>,
    subscribers: broadcast::Sender<DebugEvent>,
}

impl EventBus {
    pub fn new(max_buffer_size: usize, drop_policy: DropPolicy) -> Self {
        let (subscribers, _rx) = broadcast::channel(1024);
        EventBus {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                max_buffer_size,
                drop_policy,
            }),
            subscribers,
        }
    }

    pub fn set_max_buffer_size(&self, max_buffer_size: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.max_buffer_size = max_buffer_size;
    }

    pub fn set_drop_policy(&self, drop_policy: DropPolicy) {
        let mut inner = self.inner.lock().unwrap();
        inner.drop_policy = drop_policy;
    }

    /// Enqueue a single event, applying the configured drop policy on
    /// overflow. Never blocks.
    pub fn enqueue(&self, event: DebugEvent) {
        let to_notify = {
            let mut inner = self.inner.lock().unwrap();
            push_with_policy(&mut inner, event)
        };
        if let Some(event) = to_notify {
            let _ = self.subscribers.send(event);
        }
    }

    pub fn enqueue_batch(&self, events: Vec<DebugEvent>) {
        let mut accepted = Vec::with_capacity(events.len());
        {
            let mut inner = self.inner.lock().unwrap();
            for event in events {
                if let Some(event) = push_with_policy(&mut inner, event) {
                    accepted.push(event);
                }
            }
        }
        for event in accepted {
            let _ = self.subscribers.send(event);
        }
    }

    /// Return a snapshot of the first `n` events without removing them.
    pub fn peek(&self, n: usize) -> Vec<DebugEvent> {
        let inner = self.inner.lock().unwrap();
        inner.queue.iter().take(n).cloned().collect()
    }

    /// Remove up to `n` events from the head of the queue.
    pub fn remove_first(&self, n: usize) {
        let mut inner = self.inner.lock().unwrap();
        let n = n.min(inner.queue.len());
        inner.queue.drain(0..n);
    }

    /// Atomically take and clear the entire queue.
    pub fn dequeue_all(&self) -> Vec<DebugEvent> {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to a live feed of accepted events. Lagging subscribers
    /// silently miss events rather than blocking producers — callers should
    /// handle `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.subscribers.subscribe()
    }
}

/// Push `event` onto `inner.queue`, applying the drop policy on overflow.
/// Returns the event to notify subscribers with, or `None` if it was
/// discarded outright (dropNewest / below sample rate).
fn push_with_policy(inner: &mut Inner, event: DebugEvent) -> Option<DebugEvent> {
    if inner.max_buffer_size == 0 {
        return None;
    }

    match inner.drop_policy {
        DropPolicy::DropOldest => {
            if inner.queue.len() >= inner.max_buffer_size {
                inner.queue.pop_front();
            }
            inner.queue.push_back(event.clone());
            Some(event)
        }
        DropPolicy::DropNewest => {
            if inner.queue.len() >= inner.max_buffer_size {
                tracing::debug!("event bus full, dropping newest event");
                None
            } else {
                inner.queue.push_back(event.clone());
                Some(event)
            }
        }
        DropPolicy::Sample(rate) => {
            let draw: f64 = rand::thread_rng().gen_range(0.0..1.0);
            if draw > rate {
                return None;
            }
            if inner.queue.len() >= inner.max_buffer_size {
                inner.queue.pop_front();
            }
            inner.queue.push_back(event.clone());
            Some(event)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use probe_protocol::{LogEvent, LogLevel};
    use uuid::Uuid;

    fn log_event(message: &str) -> DebugEvent {
        DebugEvent::Log(LogEvent {
            id: Uuid::new_v4(),
            source: "test".to_owned(),
            timestamp: Utc::now(),
            level: LogLevel::Info,
            subsystem: None,
            category: None,
            thread: "main".to_owned(),
            file: "test.rs".to_owned(),
            function: "f".to_owned(),
            line: 1,
            message: message.to_owned(),
            tags: vec![],
            trace_id: None,
        })
    }

    fn message_of(event: &DebugEvent) -> String {
        match event {
            DebugEvent::Log(l) => l.message.clone(),
            _ => panic!("expected log event"),
        }
    }

    #[test]
    fn never_exceeds_max_buffer_size() {
        let bus = EventBus::new(3, DropPolicy::DropOldest);
        for i in 0..10 {
            bus.enqueue(log_event(&format!("{i}")));
        }
        assert_eq!(bus.len(), 3);
    }

    #[test]
    fn drop_oldest_retains_tail() {
        let bus = EventBus::new(3, DropPolicy::DropOldest);
        for i in 0..5 {
            bus.enqueue(log_event(&format!("{i}")));
        }
        let remaining: Vec<String> = bus.peek(10).iter().map(message_of).collect();
        assert_eq!(remaining, vec!["2", "3", "4"]);
    }

    #[test]
    fn drop_newest_retains_head() {
        let bus = EventBus::new(3, DropPolicy::DropNewest);
        for i in 0..5 {
            bus.enqueue(log_event(&format!("{i}")));
        }
        let remaining: Vec<String> = bus.peek(10).iter().map(message_of).collect();
        assert_eq!(remaining, vec!["0", "1", "2"]);
    }

    #[test]
    fn dequeue_all_clears_and_returns_everything() {
        let bus = EventBus::new(10, DropPolicy::DropOldest);
        for i in 0..4 {
            bus.enqueue(log_event(&format!("{i}")));
        }
        let drained = bus.dequeue_all();
        assert_eq!(drained.len(), 4);
        assert!(bus.is_empty());
    }

    #[test]
    fn remove_first_drops_from_head() {
        let bus = EventBus::new(10, DropPolicy::DropOldest);
        for i in 0..4 {
            bus.enqueue(log_event(&format!("{i}")));
        }
        bus.remove_first(2);
        let remaining: Vec<String> = bus.peek(10).iter().map(message_of).collect();
        assert_eq!(remaining, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn subscribers_see_accepted_events() {
        let bus = EventBus::new(10, DropPolicy::DropOldest);
        let mut rx = bus.subscribe();
        bus.enqueue(log_event("hello"));
        let received = rx.recv().await.unwrap();
        assert_eq!(message_of(&received), "hello");
    }

    #[test]
    fn sample_zero_rate_discards_everything() {
        let bus = EventBus::new(100, DropPolicy::Sample(0.0));
        for i in 0..50 {
            bus.enqueue(log_event(&format!("{i}")));
        }
        assert_eq!(bus.len(), 0);
    }

    #[test]
    fn sample_full_rate_keeps_everything() {
        let bus = EventBus::new(100, DropPolicy::Sample(1.0));
        for i in 0..50 {
            bus.enqueue(log_event(&format!("{i}")));
        }
        assert_eq!(bus.len(), 50);
    }
}
