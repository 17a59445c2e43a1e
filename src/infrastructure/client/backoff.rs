//! Bounded linear backoff for relay reconnects
//!
//! Attempt `n` waits `base_delay * n`. After `max_attempts` consecutive
//! failures the client gives up. Any successful open resets the count.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    /// Upper bound on one connect attempt, TCP and WebSocket handshake included
    pub connect_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_attempts: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the 1-indexed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: BackoffPolicy,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Connection closed or failed to open: decide what happens next
    pub fn on_close(&mut self) -> ReconnectDecision {
        if self.attempts >= self.policy.max_attempts {
            return ReconnectDecision::GiveUp;
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.policy.delay_for(self.attempts),
        }
    }
}
