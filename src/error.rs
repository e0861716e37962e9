//! The lifecycle controller's own error type.
//!
//! Matches the teacher's one-error-enum-per-module-plus-thin-wrapping
//! discipline: `ConfigError`, `PersistError`, and the rest stand alone as
//! their own types; `ProbeError` only wraps them for the one call site
//! ([`crate::Probe::start`]) that can fail across more than one subsystem.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("persistence error: {0}")]
    Persist(#[from] probe_persist::PersistError),
}
