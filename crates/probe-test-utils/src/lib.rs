//! Test doubles shared across the probe crates' test suites: a mock hub
//! WebSocket server and an in-memory [`Capture`] implementation.
//!
//! Grounded on `rt_test_utils::mock_ws_server::MockWsServer` — same
//! bind-to-port-0-and-spawn-an-accept-loop shape — adapted from the
//! forwarder/receiver hello handshake to the probe/hub register/registered
//! one.

mod mock_hub;
mod recording_capture;

pub use mock_hub::MockHub;
pub use recording_capture::RecordingCapture;
