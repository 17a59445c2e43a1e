//! Media transport port
//!
//! Audio capture, encoding and NAT traversal live behind these traits; the call
//! controller only drives them.

pub mod transport;

pub use transport::{MediaError, MediaEvent, MediaEventSink, MediaFactory, MediaTransport};
