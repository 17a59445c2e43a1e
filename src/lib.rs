//! Parley - one-to-one voice calling over a WebSocket signaling relay
//!
//! The relay keeps an in-memory map of identifiers to live connections and
//! forwards negotiation envelopes between them. The client side runs a call
//! state machine that drives a pluggable media transport and keeps its relay
//! connection alive with bounded reconnects.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
