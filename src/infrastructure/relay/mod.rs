//! Relay-side connection registry and envelope routing

pub mod registry;
pub mod router;

pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use router::{RelayRouter, RouteOutcome};
