//! Application layer - runs the call state machine against real I/O
//!
//! The controller owns the call session, the media sub-resource and the
//! timers, and is the only place effects are executed.

pub mod call_controller;
pub mod client;

pub use call_controller::{CallController, ClientNotice, RelayStatus, UserIntent};
pub use client::CallClient;
