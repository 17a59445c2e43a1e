//! Signaling bounded context - the relay wire protocol

pub mod envelope;

pub use envelope::{Envelope, EnvelopeError, Payload};
