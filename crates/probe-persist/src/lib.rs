//! Durable spill queue (C3): events that cannot be uplinked right away are
//! persisted to a local SQLite file and drained once the bridge reconnects.

pub mod store;
pub mod worker;

pub use store::{PersistError, PersistQueue};
pub use worker::PersistHandle;
