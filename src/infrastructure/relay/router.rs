//! Relay router - validates inbound envelopes and forwards them by identifier

use super::registry::{ConnectionHandle, ConnectionRegistry};
use crate::domain::shared::value_objects::Identifier;
use crate::domain::signaling::{Envelope, EnvelopeError};
use metrics::{counter, gauge};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Registry write, confirmation sent to the sender
    Registered(Identifier),
    /// Delivered to the target's outbound queue
    Forwarded { kind: &'static str, to: Identifier },
    /// Error envelope sent back to the sender
    Rejected(String),
    /// Silently absorbed (absent target for candidates and call-end, or full queue)
    Dropped { kind: &'static str, to: Identifier },
}

pub struct RelayRouter {
    registry: Arc<ConnectionRegistry>,
}

impl RelayRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one text frame received on `sender`'s connection
    pub async fn handle_frame(&self, sender: &ConnectionHandle, text: &str) -> RouteOutcome {
        match Envelope::parse_inbound(text) {
            Ok(envelope) => self.route(sender, envelope).await,
            Err(err) => self.reject_malformed(sender, err),
        }
    }

    /// Route an already validated envelope
    pub async fn route(&self, sender: &ConnectionHandle, envelope: Envelope) -> RouteOutcome {
        debug!(
            "Received message: {} from: {}",
            envelope.kind(),
            envelope.sender().map(Identifier::as_str).unwrap_or("unknown")
        );

        match envelope {
            Envelope::Register { user_id } => self.register(sender, user_id).await,

            Envelope::CallOffer { .. } | Envelope::CallAnswer { .. } => {
                self.forward_or_reject(sender, envelope).await
            }

            Envelope::IceCandidate { .. } | Envelope::CallEnd { .. } => {
                self.forward_or_drop(envelope).await
            }

            other => {
                warn!("Unknown message type: {}", other.kind());
                self.reject_malformed(sender, EnvelopeError::UnknownType(Some(other.kind().into())))
            }
        }
    }

    /// Connection closed: drop every registry entry it still holds
    pub async fn disconnect(&self, handle: &ConnectionHandle) -> Vec<Identifier> {
        let removed = self.registry.unregister(handle.id()).await;
        gauge!("relay_registered_clients").set(self.registry.len().await as f64);
        removed
    }

    async fn register(&self, sender: &ConnectionHandle, user_id: Identifier) -> RouteOutcome {
        self.registry.register(user_id.clone(), sender.clone()).await;
        gauge!("relay_registered_clients").set(self.registry.len().await as f64);
        counter!("relay_envelopes_total", "type" => "register", "outcome" => "registered")
            .increment(1);

        sender.deliver(Envelope::Registered {
            user_id: user_id.clone(),
            message: "Successfully registered".to_string(),
        });
        RouteOutcome::Registered(user_id)
    }

    async fn forward_or_reject(&self, sender: &ConnectionHandle, envelope: Envelope) -> RouteOutcome {
        let kind = envelope.kind();
        let Some(to) = envelope.target().cloned() else {
            return self.reject_malformed(sender, EnvelopeError::UnknownType(Some(kind.into())));
        };

        match self.open_handle(&to).await {
            Some(target) => self.deliver(&target, envelope, to),
            None => {
                let message = format!("User {} not found or offline", to);
                info!("{} for {}", message, kind);
                counter!("relay_envelopes_total", "type" => kind, "outcome" => "rejected")
                    .increment(1);
                sender.deliver(Envelope::error(message.clone()));
                RouteOutcome::Rejected(message)
            }
        }
    }

    async fn forward_or_drop(&self, envelope: Envelope) -> RouteOutcome {
        let kind = envelope.kind();
        let Some(to) = envelope.target().cloned() else {
            return RouteOutcome::Rejected(EnvelopeError::UnknownType(None).to_string());
        };

        match self.open_handle(&to).await {
            Some(target) => self.deliver(&target, envelope, to),
            None => {
                // candidates trail behind a teardown; a missing target is expected here
                debug!("{} for {} ignored (user offline)", kind, to);
                counter!("relay_envelopes_total", "type" => kind, "outcome" => "dropped")
                    .increment(1);
                RouteOutcome::Dropped { kind, to }
            }
        }
    }

    async fn open_handle(&self, to: &Identifier) -> Option<ConnectionHandle> {
        self.registry
            .lookup(to)
            .await
            .filter(ConnectionHandle::is_open)
    }

    fn deliver(&self, target: &ConnectionHandle, envelope: Envelope, to: Identifier) -> RouteOutcome {
        let kind = envelope.kind();
        let from = envelope.sender().cloned();

        if target.deliver(envelope) {
            debug!(
                "{} forwarded from {} to {}",
                kind,
                from.as_ref().map(Identifier::as_str).unwrap_or("unknown"),
                to
            );
            counter!("relay_envelopes_total", "type" => kind, "outcome" => "forwarded")
                .increment(1);
            RouteOutcome::Forwarded { kind, to }
        } else {
            counter!("relay_envelopes_total", "type" => kind, "outcome" => "dropped")
                .increment(1);
            RouteOutcome::Dropped { kind, to }
        }
    }

    fn reject_malformed(&self, sender: &ConnectionHandle, err: EnvelopeError) -> RouteOutcome {
        match &err {
            EnvelopeError::Malformed(detail) => warn!("Invalid message format: {}", detail),
            EnvelopeError::UnknownType(kind) => warn!("Unknown message type: {:?}", kind),
            _ => debug!("Rejected envelope: {}", err),
        }
        counter!("relay_envelopes_total", "type" => "invalid", "outcome" => "rejected")
            .increment(1);

        let message = err.to_string();
        sender.deliver(Envelope::error(message.clone()));
        RouteOutcome::Rejected(message)
    }
}
