//! Domain layer - protocol and call rules with no I/O
//!
//! - `shared`: identifiers and errors used everywhere
//! - `signaling`: the relay wire protocol
//! - `call`: the client-side negotiation state machine

pub mod call;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{DomainError, Result};
