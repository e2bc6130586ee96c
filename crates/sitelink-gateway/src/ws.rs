//! Per-tenant realtime notification sockets.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(tenant_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, tenant_id, state))
}

async fn handle_socket(mut socket: WebSocket, raw_tenant_id: String, state: Arc<AppState>) {
    let tenant_id = match Uuid::parse_str(&raw_tenant_id) {
        Ok(id) => id,
        Err(_) => {
            warn!(event = "invalid_tenant_id", tenant_id = %raw_tenant_id);
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: 1008,
                    reason: "Invalid tenant ID format".into(),
                })))
                .await;
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let write_timeout = state.write_timeout;

    // Writer task: drains the registry-facing channel into the socket. It
    // exits when the registry drops the sender or a write stalls past the
    // timeout.
    let write_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            let send = ws_sender.send(Message::Text(text));
            match tokio::time::timeout(write_timeout, send).await {
                Ok(Ok(())) => {}
                _ => return,
            }
        }
    });

    let conn_id = state.registry.connect(tenant_id, tx).await;

    // Clients only listen; the read loop exists to detect disconnect.
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(event = "read_error", conn_id = %conn_id, error = %err);
                break;
            }
        }
    }

    state.registry.disconnect(tenant_id, conn_id).await;
    let _ = write_task.await;
}
