//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - The relay's connection registry and envelope router
//! - The client's relay connection, reconnect policy and cold-start probe
//! - The media capability the call controller drives

pub mod client;
pub mod media;
pub mod relay;
