//! Call bounded context - the client-side negotiation state machine

pub mod aggregate;
pub mod event;
pub mod value_object;

pub use aggregate::CallSession;
pub use event::{CallEffect, CallInput, Epoch};
pub use value_object::{format_duration, CallDirection, CallState, EndReason};
