//! Media transport capability and its event channel

use crate::domain::call::Epoch;
use crate::domain::signaling::Payload;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Media device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Peer connection not initialized")]
    NotInitialized,

    #[error("Description rejected: {0}")]
    Rejected(String),
}

/// Lifecycle events emitted by a media transport
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// A local connectivity candidate to relay to the counterparty
    LocalCandidate(Payload),
    /// The direct peer link is up
    Connected,
    /// The peer link dropped, failed or was closed
    Ended,
}

/// Where a transport reports its events.
///
/// Each sink is stamped with the session epoch it was created for, so events
/// from a torn-down transport arrive tagged as stale.
#[derive(Debug, Clone)]
pub struct MediaEventSink {
    epoch: Epoch,
    tx: mpsc::UnboundedSender<(Epoch, MediaEvent)>,
}

impl MediaEventSink {
    pub fn new(epoch: Epoch, tx: mpsc::UnboundedSender<(Epoch, MediaEvent)>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Returns false once the controller is gone
    pub fn emit(&self, event: MediaEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }
}

/// One peer connection's worth of media negotiation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Produce the local description for an outgoing call
    async fn create_local_offer(&self) -> Result<Payload, MediaError>;

    /// Apply a remote offer and produce the local answer
    async fn accept_remote_offer_and_create_answer(
        &self,
        offer: Payload,
    ) -> Result<Payload, MediaError>;

    async fn accept_remote_answer(&self, answer: Payload) -> Result<(), MediaError>;

    async fn add_remote_candidate(&self, candidate: Payload) -> Result<(), MediaError>;

    /// Release devices and the peer connection
    async fn close(&self);
}

/// Creates a fresh transport at the start of every call session
#[cfg_attr(test, mockall::automock)]
pub trait MediaFactory: Send + Sync {
    fn create(&self, events: MediaEventSink) -> Result<Box<dyn MediaTransport>, MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_tags_events_with_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = MediaEventSink::new(7, tx);

        assert!(sink.emit(MediaEvent::Connected));
        assert_eq!(rx.recv().await, Some((7, MediaEvent::Connected)));

        drop(rx);
        assert!(!sink.emit(MediaEvent::Ended));
    }
}
