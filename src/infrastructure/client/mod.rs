//! Client-side relay plumbing: connection with backoff, cold-start probing

pub mod backoff;
pub mod error;
pub mod relay_client;
pub mod wakeup;

pub use backoff::{BackoffPolicy, ReconnectDecision, ReconnectState};
pub use error::{ClientError, ProbeError};
pub use relay_client::{RelayClient, RelayClientHandle, RelayEvent, SignalSender};
pub use wakeup::{health_url_for, ColdStartProber, WakeupConfig, WakeupStatus};
