//! Durable SQLite spill queue for events that cannot be uplinked right away.
//!
//! # SQLite durability settings
//! Applied at open: WAL, synchronous=FULL, wal_autocheckpoint=1000,
//! foreign_keys=ON. `PRAGMA integrity_check` runs at open; a failure is
//! reported rather than silently tolerated.

use std::path::Path;

use probe_protocol::DebugEvent;
use rusqlite::{Connection, params};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The durable spill queue. Single-writer by construction (owned exclusively
/// by one [`crate::worker::PersistWorker`] task); callers never share a
/// connection.
pub struct PersistQueue {
    conn: Connection,
    max_queue_size: usize,
}

impl PersistQueue {
    /// Open (or create) the queue at `path`, evicting anything older than
    /// `max_retention_seconds`.
    pub fn open(
        path: &Path,
        max_queue_size: usize,
        max_retention_seconds: i64,
    ) -> Result<Self, PersistError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        apply_schema(&conn)?;
        let mut queue = PersistQueue {
            conn,
            max_queue_size,
        };
        queue.evict_older_than(max_retention_seconds)?;
        Ok(queue)
    }

    pub fn open_in_memory(max_queue_size: usize) -> Result<Self, PersistError> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        Ok(PersistQueue {
            conn,
            max_queue_size,
        })
    }

    /// Persist one event, evicting the oldest row if `max_queue_size` would
    /// be exceeded.
    pub fn enqueue(&mut self, event: &DebugEvent, write_time: i64) -> Result<(), PersistError> {
        let payload = serde_json::to_vec(event)?;
        self.conn.execute(
            "INSERT INTO persisted_events (write_time, payload) VALUES (?1, ?2)",
            params![write_time, payload],
        )?;
        self.evict_over_capacity()?;
        Ok(())
    }

    /// Return and remove up to `max_count` events from the head (oldest
    /// first).
    pub fn dequeue_batch(&mut self, max_count: usize) -> Result<Vec<DebugEvent>, PersistError> {
        let ids_and_payloads: Vec<(i64, Vec<u8>)> = {
            let mut stmt = self.conn.prepare(
                "SELECT id, payload FROM persisted_events ORDER BY id ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![max_count as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        if ids_and_payloads.is_empty() {
            return Ok(Vec::new());
        }

        let tx = self.conn.transaction()?;
        let mut events = Vec::with_capacity(ids_and_payloads.len());
        for (id, payload) in ids_and_payloads {
            let event: DebugEvent = serde_json::from_slice(&payload)?;
            tx.execute("DELETE FROM persisted_events WHERE id = ?1", params![id])?;
            events.push(event);
        }
        tx.commit()?;
        Ok(events)
    }

    pub fn queue_count(&self) -> Result<usize, PersistError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM persisted_events", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn evict_over_capacity(&mut self) -> Result<(), PersistError> {
        if self.max_queue_size == 0 {
            return Ok(());
        }
        self.conn.execute(
            "DELETE FROM persisted_events WHERE id IN (
                 SELECT id FROM persisted_events ORDER BY id ASC
                 LIMIT MAX(0, (SELECT COUNT(*) FROM persisted_events) - ?1)
             )",
            params![self.max_queue_size as i64],
        )?;
        Ok(())
    }

    fn evict_older_than(&mut self, max_retention_seconds: i64) -> Result<(), PersistError> {
        if max_retention_seconds <= 0 {
            return Ok(());
        }
        let cutoff = chrono::Utc::now().timestamp() - max_retention_seconds;
        self.conn.execute(
            "DELETE FROM persisted_events WHERE write_time < ?1",
            params![cutoff],
        )?;
        Ok(())
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), PersistError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA wal_autocheckpoint=1000;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), PersistError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(PersistError::IntegrityCheckFailed(result));
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<(), PersistError> {
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(())
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
    fn enqueue_and_dequeue_preserve_order() {
        let mut queue = PersistQueue::open_in_memory(100).unwrap();
        for i in 0..5 {
            queue.enqueue(&log_event(&format!("{i}")), i).unwrap();
        }
        let batch = queue.dequeue_batch(3).unwrap();
        let messages: Vec<String> = batch.iter().map(message_of).collect();
        assert_eq!(messages, vec!["0", "1", "2"]);
        assert_eq!(queue.queue_count().unwrap(), 2);
    }

    #[test]
    fn dequeue_removes_returned_events() {
        let mut queue = PersistQueue::open_in_memory(100).unwrap();
        queue.enqueue(&log_event("a"), 0).unwrap();
        let first = queue.dequeue_batch(10).unwrap();
        assert_eq!(first.len(), 1);
        let second = queue.dequeue_batch(10).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn evicts_over_capacity() {
        let mut queue = PersistQueue::open_in_memory(3).unwrap();
        for i in 0..10 {
            queue.enqueue(&log_event(&format!("{i}")), i).unwrap();
        }
        assert_eq!(queue.queue_count().unwrap(), 3);
        let batch = queue.dequeue_batch(10).unwrap();
        let messages: Vec<String> = batch.iter().map(message_of).collect();
        assert_eq!(messages, vec!["7", "8", "9"]);
    }

    #[test]
    fn open_runs_integrity_check() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let queue = PersistQueue::open(file.path(), 100, 0).unwrap();
        assert_eq!(queue.queue_count().unwrap(), 0);
    }

    #[test]
    fn retention_evicts_stale_rows_on_open() {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let mut queue = PersistQueue::open(file.path(), 100, 0).unwrap();
            let old_time = Utc::now().timestamp() - 1000;
            queue.enqueue(&log_event("stale"), old_time).unwrap();
        }
        let queue = PersistQueue::open(file.path(), 100, 10).unwrap();
        assert_eq!(queue.queue_count().unwrap(), 0);
    }
}
