//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Negotiation state of the single call a client can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// No call; ready to dial or accept
    Idle,
    /// Outgoing offer sent, or incoming offer being answered
    Calling,
    /// Media path is up
    Connected,
    /// Call just finished; returns to `Idle` after the settle delay
    Ended,
}

impl CallState {
    /// A session with a live media sub-resource exists
    pub fn is_active(&self) -> bool {
        matches!(self, CallState::Calling | CallState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Calling => "calling",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who sent the offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Reason for call ending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// Local user hung up
    LocalHangup,
    /// Counterparty sent `call-end`
    RemoteHangup,
    /// Media transport reported the link gone
    MediaEnded,
}

/// Render a call duration as `m:ss`
pub fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
