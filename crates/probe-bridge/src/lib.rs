//! The bridge client (C6): the duplex WebSocket connection to the remote
//! hub, its connection state machine, and the timers that keep it
//! registered, flushing, recovering, and reconnecting.

pub mod client;
pub mod config;
pub mod session;
pub mod state;

pub use client::{BridgeClient, BridgeEvent};
pub use config::BridgeConfig;
pub use session::{BridgeSession, SessionError};
pub use state::ConnectionState;
