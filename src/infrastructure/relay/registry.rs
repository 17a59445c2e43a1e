//! Connection registry - maps identifiers to live relay connections
//!
//! At most one handle per identifier. Registering an identifier that is
//! already present replaces the old handle without closing it; the old
//! connection is either stale or will close on its own.

use crate::domain::shared::value_objects::{ConnectionId, Identifier};
use crate::domain::signaling::Envelope;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Sending side of one relay connection's bounded outbound queue
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Envelope>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
        }
    }

    /// Create a handle together with the receiver its writer task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue an envelope without waiting.
    ///
    /// A full queue drops the envelope so one stalled peer cannot hold up the router.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                warn!(
                    "Outbound queue full for connection {}, dropping {}",
                    self.id,
                    envelope.kind()
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Connection {} already closed", self.id);
                false
            }
        }
    }
}

/// In-memory registry shared by all connection workers
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<Identifier, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the handle for `identifier`; returns the replaced handle
    pub async fn register(
        &self,
        identifier: Identifier,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut entries = self.entries.write().await;
        let previous = entries.insert(identifier.clone(), handle);

        match &previous {
            Some(old) => info!(
                "User {} re-registered, superseding connection {}",
                identifier,
                old.id()
            ),
            None => info!("User {} registered", identifier),
        }
        previous
    }

    pub async fn lookup(&self, identifier: &Identifier) -> Option<ConnectionHandle> {
        let entries = self.entries.read().await;
        entries.get(identifier).cloned()
    }

    /// Remove every entry held by this connection.
    ///
    /// Identifiers since re-registered on a newer connection are left alone,
    /// so the result is empty for a connection that was never registered or
    /// has been superseded everywhere.
    pub async fn unregister(&self, connection: ConnectionId) -> Vec<Identifier> {
        let mut entries = self.entries.write().await;
        let mut removed = Vec::new();
        entries.retain(|identifier, handle| {
            if handle.id() == connection {
                removed.push(identifier.clone());
                false
            } else {
                true
            }
        });
        removed.sort();

        for identifier in &removed {
            info!("User {} disconnected", identifier);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Registered identifiers, sorted
    pub async fn identifiers(&self) -> Vec<Identifier> {
        let entries = self.entries.read().await;
        let mut ids: Vec<Identifier> = entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identifier {
        Identifier::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);

        assert!(registry.register(id("alice"), handle.clone()).await.is_none());

        let found = registry.lookup(&id("alice")).await.unwrap();
        assert_eq!(found.id(), handle.id());
        assert!(registry.lookup(&id("bob")).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_reregister_replaces_handle() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = ConnectionHandle::channel(4);
        let (second, _rx2) = ConnectionHandle::channel(4);

        registry.register(id("alice"), first.clone()).await;
        let replaced = registry.register(id("alice"), second.clone()).await.unwrap();

        assert_eq!(replaced.id(), first.id());
        assert_eq!(registry.lookup(&id("alice")).await.unwrap().id(), second.id());
        assert_eq!(registry.len().await, 1);
        // superseded handle is not closed by the registry
        assert!(first.is_open());
    }

    #[tokio::test]
    async fn test_unregister_by_handle_identity() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = ConnectionHandle::channel(4);
        let (second, _rx2) = ConnectionHandle::channel(4);

        registry.register(id("alice"), first.clone()).await;
        registry.register(id("alice"), second.clone()).await;

        // the stale connection closing must not evict the live one
        assert!(registry.unregister(first.id()).await.is_empty());
        assert_eq!(registry.lookup(&id("alice")).await.unwrap().id(), second.id());

        assert_eq!(registry.unregister(second.id()).await, vec![id("alice")]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_removes_every_identifier_of_connection() {
        let registry = ConnectionRegistry::new();
        let (shared, _rx) = ConnectionHandle::channel(4);
        let (other, _other_rx) = ConnectionHandle::channel(4);

        registry.register(id("alice"), shared.clone()).await;
        registry.register(id("alice2"), shared.clone()).await;
        registry.register(id("bob"), other).await;

        assert_eq!(
            registry.unregister(shared.id()).await,
            vec![id("alice"), id("alice2")]
        );
        assert_eq!(registry.identifiers().await, vec![id("bob")]);
    }

    #[tokio::test]
    async fn test_identifiers_sorted() {
        let registry = ConnectionRegistry::new();
        for name in ["carol", "alice", "bob"] {
            let (handle, _rx) = ConnectionHandle::channel(1);
            registry.register(id(name), handle).await;
        }
        assert_eq!(
            registry.identifiers().await,
            vec![id("alice"), id("bob"), id("carol")]
        );
    }

    #[tokio::test]
    async fn test_deliver_drops_when_full() {
        let (handle, mut rx) = ConnectionHandle::channel(1);
        assert!(handle.deliver(Envelope::error("one")));
        assert!(!handle.deliver(Envelope::error("two")));
        assert_eq!(rx.recv().await, Some(Envelope::error("one")));

        drop(rx);
        assert!(!handle.is_open());
        assert!(!handle.deliver(Envelope::error("three")));
    }
}
