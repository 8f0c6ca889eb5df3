//! WebSocket fan-out of round events
//!
//! Every client receives every round event as `{"event": ..., "data": ...}`.
//! A heartbeat ping keeps idle connections open between rounds.

use super::handlers::AppState;
use crate::events::EventBroadcaster;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast::error::RecvError, time::interval};
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket connection manager
#[derive(Clone)]
pub struct WebSocketManager {
    events: EventBroadcaster,
    client_count: Arc<AtomicU64>,
}

impl WebSocketManager {
    pub fn new(events: EventBroadcaster) -> Self {
        Self {
            events,
            client_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn handle_upgrade(&self, ws: WebSocketUpgrade) -> Response {
        let manager = self.clone();
        ws.on_upgrade(move |socket| async move { manager.handle_connection(socket).await })
    }

    async fn handle_connection(&self, socket: WebSocket) {
        let client_id = generate_client_id();
        let total = self.client_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!("WebSocket client {} connected (total: {})", client_id, total);

        let (mut sender, mut receiver) = socket.split();
        let mut events = self.events.subscribe();

        let recv_client = client_id.clone();
        let mut receive_task = tokio::spawn(async move {
            while let Some(msg) = receiver.next().await {
                match msg {
                    Ok(Message::Close(_)) => {
                        debug!("Client {} requested close", recv_client);
                        break;
                    }
                    Ok(Message::Pong(_)) => debug!("Received pong from client {}", recv_client),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error from client {}: {}", recv_client, e);
                        break;
                    }
                }
            }
        });

        let send_client = client_id.clone();
        let mut send_task = tokio::spawn(async move {
            let mut heartbeat = interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;

            loop {
                let message = tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => match serde_json::to_string(&event) {
                            Ok(text) => Message::Text(text),
                            Err(e) => {
                                error!("Failed to serialize {} event: {}", event.name(), e);
                                continue;
                            }
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Client {} lagged, skipped {} events", send_client, skipped);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = heartbeat.tick() => Message::Ping(Vec::new()),
                };

                if sender.send(message).await.is_err() {
                    debug!("Client {} disconnected", send_client);
                    break;
                }
            }
        });

        // Whichever side finishes first tears the connection down
        tokio::select! {
            _ = &mut receive_task => send_task.abort(),
            _ = &mut send_task => receive_task.abort(),
        }

        let remaining = self.client_count.fetch_sub(1, Ordering::SeqCst) - 1;
        info!("WebSocket client {} disconnected (remaining: {})", client_id, remaining);
    }

    pub fn client_count(&self) -> u64 {
        self.client_count.load(Ordering::SeqCst)
    }
}

/// GET /ws
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    state.websocket_manager.handle_upgrade(ws)
}

fn generate_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("ws_{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}
