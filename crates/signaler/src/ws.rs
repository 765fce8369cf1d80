//! WebSocket transport.
//!
//! One writer task drains the connection's outbound queue into the socket
//! and pings every [`PING_INTERVAL_SECS`]; the reader runs in the upgrade
//! task and feeds text frames to the [`ClientSession`]. Whichever side ends
//! first ends the connection.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use medirelay_common::constants::PING_INTERVAL_SECS;

use crate::registry::Connection;
use crate::session::ClientSession;
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(PING_INTERVAL_SECS);

/// Drive one accepted socket until it closes
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (conn, mut rx) = Connection::channel(state.config.relay.send_queue_capacity);
    let connection_id = conn.id().clone();
    tracing::info!(connection_id = %connection_id, "WebSocket client connected");

    let mut session = ClientSession::new(state, conn);
    session.greet();

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = connection_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        ping_interval.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(message) = msg else { break };
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(connection_id = %writer_cid, error = %e, "Failed to encode message");
                            continue;
                        }
                    };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "Sent ping");
                }
            }
        }
    });

    let reader = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => session.handle_text(text.as_str()).await,
                WsMessage::Close(_) => break,
                // axum answers pings itself
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => {
            tracing::debug!(connection_id = %connection_id, "Socket writer ended");
        }
    }

    session.close().await;
    writer.abort();
}
