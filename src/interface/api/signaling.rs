//! Relay WebSocket endpoint and the small HTTP surface around it

use crate::domain::signaling::Envelope;
use crate::infrastructure::relay::{ConnectionHandle, ConnectionRegistry, RelayRouter};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared state for the relay routes
#[derive(Clone)]
pub struct RelayState {
    pub router: Arc<RelayRouter>,
    pub started_at: Instant,
    pub outbound_queue: usize,
}

impl RelayState {
    pub fn new(router: Arc<RelayRouter>, outbound_queue: usize) -> Self {
        Self {
            router,
            started_at: Instant::now(),
            outbound_queue,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub clients: usize,
    pub uptime: f64,
    pub timestamp: String,
}

pub async fn health_check(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        clients: state.router.registry().len().await,
        uptime: state.started_at.elapsed().as_secs_f64(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        "WebSocket Signaling Server - Use WebSocket connection",
    )
        .into_response()
}

/// WebSocket upgrade handler
pub async fn signaling_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (handle, mut outbound) = ConnectionHandle::channel(state.outbound_queue);
    let connection_id = handle.id();
    info!("New client connected: {}", connection_id);

    let (mut sender, mut receiver) = socket.split();

    handle.deliver(Envelope::Connected {
        message: "Connected to signaling server".to_string(),
    });

    // Task to write queued envelopes to this connection
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = outbound.recv().await {
            let json = match envelope.to_json() {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize {}: {}", envelope.kind(), e);
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Task to route frames read from this connection
    let router = state.router.clone();
    let recv_handle = handle.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            let outcome = match result {
                Ok(Message::Text(text)) => router.handle_frame(&recv_handle, &text).await,
                Ok(Message::Binary(data)) => {
                    let text = String::from_utf8_lossy(&data);
                    router.handle_frame(&recv_handle, &text).await
                }
                Ok(Message::Close(_)) => {
                    debug!("Close frame from {}", connection_id);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(e) => {
                    warn!("WebSocket error on {}: {}", connection_id, e);
                    break;
                }
            };
            debug!("Connection {}: {:?}", connection_id, outcome);
        }
    });

    // Wait for either task to finish
    let mut send_task = send_task;
    let mut recv_task = recv_task;
    tokio::select! {
        _ = &mut send_task => {
            debug!("Send task finished for {}", connection_id);
            recv_task.abort();
        }
        _ = &mut recv_task => {
            debug!("Receive task finished for {}", connection_id);
            send_task.abort();
        }
    }

    let removed = state.router.disconnect(&handle).await;
    if removed.is_empty() {
        info!("Client disconnected: {} (never registered)", connection_id);
    }
    for identifier in removed {
        info!("Client disconnected: {}", identifier);
    }
}

/// Log the registry contents on a fixed interval; a zero interval disables it
pub fn spawn_stats_task(
    registry: Arc<ConnectionRegistry>,
    every: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            ticker.tick().await;
            let identifiers = registry.identifiers().await;
            info!(
                "Connected clients: {} [{}]",
                identifiers.len(),
                identifiers
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }))
}
