//! Relay connection with automatic reconnect
//!
//! One background task owns the WebSocket. On every open it re-sends
//! `register` for the local identifier, since the relay keeps nothing across
//! connections. Reconnects are strictly sequential, so at most one retry timer
//! is ever pending.

use super::backoff::{BackoffPolicy, ReconnectDecision, ReconnectState};
use super::error::ClientError;
use crate::domain::shared::value_objects::Identifier;
use crate::domain::signaling::Envelope;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle and inbound traffic
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Connected,
    Disconnected,
    /// A retry has been scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Retry budget exhausted; the task has stopped
    Failed(String),
    Message(Envelope),
}

/// Outbound half of the relay connection, as seen by the call controller
pub trait SignalSender: Send + Sync {
    fn send(&self, envelope: Envelope) -> Result<(), ClientError>;

    fn is_ready(&self) -> bool;
}

#[derive(Clone)]
pub struct RelayClientHandle {
    outbound: mpsc::UnboundedSender<Envelope>,
    ready: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RelayClientHandle {
    /// Cancel any pending reconnect and close the socket
    pub fn disconnect(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
    }
}

impl SignalSender for RelayClientHandle {
    fn send(&self, envelope: Envelope) -> Result<(), ClientError> {
        if !self.is_ready() {
            error!("Relay not connected, dropping {}", envelope.kind());
            return Err(ClientError::NotConnected);
        }
        self.outbound
            .send(envelope)
            .map_err(|_| ClientError::NotConnected)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

enum PumpExit {
    Closed,
    Shutdown,
}

pub struct RelayClient {
    url: String,
    identifier: Identifier,
    backoff: ReconnectState,
    outbound: mpsc::UnboundedReceiver<Envelope>,
    events: mpsc::UnboundedSender<RelayEvent>,
    ready: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl RelayClient {
    /// Start the connection task.
    ///
    /// Returns the send handle, the event stream and the task handle.
    pub fn spawn(
        url: impl Into<String>,
        identifier: Identifier,
        policy: BackoffPolicy,
    ) -> (
        RelayClientHandle,
        mpsc::UnboundedReceiver<RelayEvent>,
        JoinHandle<()>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ready = Arc::new(AtomicBool::new(false));

        let client = RelayClient {
            url: url.into(),
            identifier,
            backoff: ReconnectState::new(policy),
            outbound: outbound_rx,
            events: events_tx,
            ready: ready.clone(),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(client.run());

        let handle = RelayClientHandle {
            outbound: outbound_tx,
            ready,
            shutdown: Arc::new(shutdown_tx),
        };
        (handle, events_rx, task)
    }

    async fn run(mut self) {
        loop {
            if self.is_shutdown() {
                return;
            }

            let connect_timeout = self.backoff.policy().connect_timeout;
            let attempt = tokio::select! {
                result = tokio::time::timeout(connect_timeout, connect_async(self.url.as_str())) => result,
                _ = self.shutdown.changed() => return,
            };

            match attempt {
                Ok(Ok((socket, _))) => {
                    info!("Relay connected: {}", self.url);
                    self.backoff.on_open();

                    let exit = self.serve(socket).await;
                    self.ready.store(false, Ordering::SeqCst);
                    // frames queued for the dead socket are not replayed
                    while self.outbound.try_recv().is_ok() {}

                    if matches!(exit, PumpExit::Shutdown) {
                        info!("Relay connection closed by client");
                        return;
                    }
                    info!("Relay disconnected");
                    self.emit(RelayEvent::Disconnected);
                }
                Ok(Err(e)) => {
                    warn!("Relay connection to {} failed: {}", self.url, e);
                }
                Err(_) => {
                    warn!(
                        "Relay connection to {} timed out after {:?}",
                        self.url, connect_timeout
                    );
                }
            }

            match self.backoff.on_close() {
                ReconnectDecision::Retry { attempt, delay } => {
                    info!(
                        "Attempting to reconnect... ({}/{}) in {:?}",
                        attempt,
                        self.backoff.policy().max_attempts,
                        delay
                    );
                    self.emit(RelayEvent::Reconnecting { attempt, delay });
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.changed() => return,
                    }
                }
                ReconnectDecision::GiveUp => {
                    let reason = "Failed to reconnect after multiple attempts".to_string();
                    error!("{}", reason);
                    self.emit(RelayEvent::Failed(reason));
                    return;
                }
            }
        }
    }

    /// Register, then pump frames both ways until the socket dies
    async fn serve(&mut self, socket: RelaySocket) -> PumpExit {
        let (mut write, mut read) = socket.split();

        let register = Envelope::Register {
            user_id: self.identifier.clone(),
        };
        match register.to_json() {
            Ok(text) => {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Failed to register with relay: {}", e);
                    return PumpExit::Closed;
                }
            }
            Err(e) => {
                error!("Failed to serialize register envelope: {}", e);
                return PumpExit::Closed;
            }
        }
        self.ready.store(true, Ordering::SeqCst);
        self.emit(RelayEvent::Connected);

        loop {
            tokio::select! {
                outbound = self.outbound.recv() => match outbound {
                    Some(envelope) => {
                        let text = match envelope.to_json() {
                            Ok(text) => text,
                            Err(e) => {
                                error!("Failed to serialize {}: {}", envelope.kind(), e);
                                continue;
                            }
                        };
                        if write.send(Message::Text(text)).await.is_err() {
                            return PumpExit::Closed;
                        }
                    }
                    None => return PumpExit::Shutdown,
                },
                inbound = read.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received relay message: {}", text);
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => self.emit(RelayEvent::Message(envelope)),
                            Err(e) => warn!("Failed to parse relay message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return PumpExit::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Relay socket error: {}", e);
                        return PumpExit::Closed;
                    }
                },
                _ = self.shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return PumpExit::Shutdown;
                }
            }
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_send_before_connect_is_not_connected() {
        let port = unused_port().await;
        let (handle, _events, task) = RelayClient::spawn(
            format!("ws://127.0.0.1:{}", port),
            Identifier::parse("alice").unwrap(),
            BackoffPolicy {
                base_delay: Duration::from_secs(5),
                max_attempts: 1,
                ..BackoffPolicy::default()
            },
        );

        let result = handle.send(Envelope::error("x"));
        assert!(matches!(result, Err(ClientError::NotConnected)));

        handle.disconnect();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_retry_budget() {
        let port = unused_port().await;
        let (_handle, mut events, task) = RelayClient::spawn(
            format!("ws://127.0.0.1:{}", port),
            Identifier::parse("alice").unwrap(),
            BackoffPolicy {
                base_delay: Duration::from_millis(10),
                max_attempts: 3,
                ..BackoffPolicy::default()
            },
        );

        let mut scheduled = Vec::new();
        let failure = timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                match event {
                    RelayEvent::Reconnecting { attempt, delay } => scheduled.push((attempt, delay)),
                    RelayEvent::Failed(reason) => return reason,
                    other => panic!("unexpected event {:?}", other),
                }
            }
            panic!("event stream ended without failure");
        })
        .await
        .unwrap();

        assert_eq!(failure, "Failed to reconnect after multiple attempts");
        assert_eq!(
            scheduled,
            vec![
                (1, Duration::from_millis(10)),
                (2, Duration::from_millis(20)),
                (3, Duration::from_millis(30)),
            ]
        );
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out_and_consumes_retry() {
        // accepts TCP but never answers the WebSocket upgrade
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let (_handle, mut events, task) = RelayClient::spawn(
            format!("ws://127.0.0.1:{}", port),
            Identifier::parse("alice").unwrap(),
            BackoffPolicy {
                base_delay: Duration::from_millis(10),
                max_attempts: 1,
                connect_timeout: Duration::from_millis(100),
            },
        );

        let first = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
        assert_eq!(
            first,
            Some(RelayEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(10),
            })
        );
        let second = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
        assert_eq!(
            second,
            Some(RelayEvent::Failed(
                "Failed to reconnect after multiple attempts".to_string()
            ))
        );

        task.await.unwrap();
        server.abort();
    }
}
