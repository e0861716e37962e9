//! Read-only SQLite inspector (C7).
//!
//! Exposes the on-device SQLite stores named in a [`DatabaseRegistry`] to the
//! hub's `dbCommand`/`dbResponse` exchange, at the command-protocol surface
//! only — query execution itself is a thin, intentionally unremarkable
//! `rusqlite` wrapper.

mod inspector;

pub use inspector::{DatabaseSpec, DbInspector, DbInspectorError};
