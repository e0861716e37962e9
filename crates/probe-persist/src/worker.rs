//! Async front for [`crate::store::PersistQueue`].
//!
//! `PersistQueue` is plain synchronous rusqlite code; to keep writes off the
//! capture path a single background task owns it exclusively and serves
//! requests sent over an intake channel, mirroring the single-writer
//! discipline the bridge client and event bus both use.

use std::path::PathBuf;

use probe_protocol::DebugEvent;
use tokio::sync::{mpsc, oneshot};

use crate::store::{PersistError, PersistQueue};

enum Command {
    Enqueue(DebugEvent, i64),
    DequeueBatch(usize, oneshot::Sender<Result<Vec<DebugEvent>, PersistError>>),
    QueueCount(oneshot::Sender<Result<usize, PersistError>>),
}

/// A handle to the persistence worker task. Cloning is cheap; all clones
/// share the same underlying queue.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl PersistHandle {
    /// Spawn the worker task against a queue opened at `path`.
    pub fn spawn(
        path: PathBuf,
        max_queue_size: usize,
        max_retention_seconds: i64,
    ) -> Result<Self, PersistError> {
        let mut queue = PersistQueue::open(&path, max_queue_size, max_retention_seconds)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || run(&mut queue, rx));
        Ok(PersistHandle { tx })
    }

    pub fn spawn_in_memory(max_queue_size: usize) -> Result<Self, PersistError> {
        let mut queue = PersistQueue::open_in_memory(max_queue_size)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || run(&mut queue, rx));
        Ok(PersistHandle { tx })
    }

    /// Fire-and-forget enqueue; the capture path never waits on disk I/O.
    pub fn enqueue(&self, event: DebugEvent) {
        let write_time = chrono::Utc::now().timestamp();
        let _ = self.tx.send(Command::Enqueue(event, write_time));
    }

    pub async fn dequeue_batch(&self, max_count: usize) -> Result<Vec<DebugEvent>, PersistError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::DequeueBatch(max_count, reply_tx))
            .map_err(|_| PersistError::Sqlite(rusqlite::Error::InvalidQuery))?;
        reply_rx
            .await
            .map_err(|_| PersistError::Sqlite(rusqlite::Error::InvalidQuery))?
    }

    pub async fn queue_count(&self) -> Result<usize, PersistError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::QueueCount(reply_tx))
            .map_err(|_| PersistError::Sqlite(rusqlite::Error::InvalidQuery))?;
        reply_rx
            .await
            .map_err(|_| PersistError::Sqlite(rusqlite::Error::InvalidQuery))?
    }
}

fn run(queue: &mut PersistQueue, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            Command::Enqueue(event, write_time) => {
                if let Err(e) = queue.enqueue(&event, write_time) {
                    tracing::warn!(error = %e, "failed to persist event");
                }
            }
            Command::DequeueBatch(max_count, reply) => {
                let _ = reply.send(queue.dequeue_batch(max_count));
            }
            Command::QueueCount(reply) => {
                let _ = reply.send(queue.queue_count());
            }
        }
    }
}
