// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Per-connection WebSocket loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::debug;

use super::handlers::dispatch;
use super::msg;
use super::Gateway;

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(
    State(gateway): State<Arc<Gateway>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let client_id = next_client_id();
        handle_connection(gateway, socket, client_id)
    })
}

/// Drive one client: pump the outbound queue and dispatch inbound frames.
async fn handle_connection(gateway: Arc<Gateway>, socket: WebSocket, client_id: String) {
    let mut outbound_rx = gateway.register_client(&client_id);
    let (mut ws_tx, mut ws_rx) = socket.split();

    gateway.send_value(
        &client_id,
        msg::outbound("connected", None, json!({ "clientId": client_id })),
    );

    loop {
        tokio::select! {
            queued = outbound_rx.recv() => {
                let Some(text) = queued else {
                    break;
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = ws_rx.next() => {
                let frame = match frame {
                    Some(Ok(f)) => f,
                    Some(Err(_)) | None => break,
                };
                match frame {
                    Message::Text(text) => {
                        match msg::Envelope::parse(&text) {
                            Ok(envelope) => {
                                if let Some(reply) =
                                    dispatch(&gateway, &client_id, envelope).await
                                {
                                    gateway.send_value(&client_id, reply);
                                }
                            }
                            Err(error) => {
                                gateway.send_value(
                                    &client_id,
                                    msg::error_reply(&error, None),
                                );
                            }
                        }
                    }
                    Message::Close(_) => break,
                    // Pings are answered by axum; binary frames are not part
                    // of the protocol.
                    _ => {}
                }
            }
        }
    }

    gateway.unregister_client(&client_id);
    if let Some(manager) = gateway.manager() {
        manager.handle_client_disconnect(&client_id).await;
    }
    debug!(client = %client_id, "connection closed");
}

/// Connection id: unique per process, stable for the connection's lifetime.
fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("ws-{ts:x}-{n}")
}
