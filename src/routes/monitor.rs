//! # routes::monitor
//!
//! **Event Feed**: live WebSocket for dashboards.
//!
//! | Method    | Path         | Description                                   |
//! |-----------|--------------|-----------------------------------------------|
//! | GET (WS)  | `/ws/events` | snapshot on connect, then every `BotEvent` as JSON |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::state::SharedState;

pub async fn ws_events(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.notifier.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 Dashboard connected");

    // ── Snapshot on connect ──────────────────────────────────────────────────
    let position = state.store.get().await.ok();
    let connection = state.connection.borrow().clone();
    let snapshot = json!({
        "event":      "SNAPSHOT",
        "position":   position,
        "connection": connection,
    })
    .to_string();

    if sender.send(Message::Text(snapshot)).await.is_err() {
        return;
    }

    // ── Event loop ───────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            result = rx.recv() => match result {
                Ok(json_str) => {
                    if sender.send(Message::Text(json_str)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => debug!("Dashboard lagged, skipped {n} events"),
                Err(RecvError::Closed) => break,
            },

            result = receiver.next() => match result {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(Message::Ping(data))) => {
                    let _ = sender.send(Message::Pong(data)).await;
                }
                _ => {}
            },
        }
    }

    info!("🔌 Dashboard disconnected");
}
