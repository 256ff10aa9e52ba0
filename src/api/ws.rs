//! WebSocket endpoints for realtime queue events.
//!
//! A connection subscribes to exactly one scope (a service or a token) and
//! receives its events as JSON text frames. The stream is one-way; inbound
//! frames other than ping/close are ignored.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::realtime::QueueEvent;
use crate::AppState;

pub async fn service_socket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let rx = state.realtime.subscribe_service(&id);
    ws.on_upgrade(move |socket| stream_events(socket, rx, format!("service:{id}")))
}

pub async fn token_socket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let rx = state.realtime.subscribe_token(&id);
    ws.on_upgrade(move |socket| stream_events(socket, rx, format!("token:{id}")))
}

async fn stream_events(
    socket: WebSocket,
    mut rx: broadcast::Receiver<QueueEvent>,
    scope: String,
) {
    debug!(scope = %scope, "WebSocket connected");
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(scope = %scope, error = %e, "Skipping unserializable event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                // A slow consumer missed events; it can re-fetch state over HTTP.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(scope = %scope, skipped = skipped, "WebSocket consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(scope = %scope, "WebSocket disconnected");
}
