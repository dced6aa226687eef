// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket connection lifecycle.
//!
//! One task per connection. Inbound frames are handled in arrival order;
//! outbound frames arrive through the connection's registry queue so any task
//! may address any connection without touching its socket.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::handshake::Handshake;
use crate::registry::Outbound;
use crate::state::GatewayState;

/// `GET /ws`
pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let router = &state.router;
    let (conn, mut outbound) = state.registry().open();
    let mut handshake = Handshake::new();
    handshake.begin();
    info!(conn = conn.id(), "connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let frame = CloseFrame { code: close_code::AWAY, reason: "shutting down".into() };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                break;
            }

            item = outbound.recv() => {
                match item {
                    Some(Outbound::Text(text)) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        router.handle_text(&conn, &mut handshake, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(conn = conn.id(), "ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(conn = conn.id(), err = %e, "transport error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let identity = handshake.identity().map(str::to_owned);
    router.terminate(&conn, &mut handshake);
    info!(conn = conn.id(), user = ?identity, "connection closed");
}
