//! `/live` WebSocket driver
//!
//! One writer task drains the connection's bounded queue and pings on an
//! interval; one reader task feeds text frames to the router in arrival
//! order. Whichever ends first takes the other down, then the connection is
//! unregistered.

use super::connection::ConnectionId;
use crate::core::auth::middleware::bearer_token;
use crate::core::config::AppState;
use crate::core::error::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use parley_common::{ServerEvent, UserId};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default, Deserialize)]
pub struct LiveParams {
    pub token: Option<String>,
}

/// GET /live
///
/// The bearer token may come from the `Authorization` header or `?token=`.
/// An invalid token is refused before the upgrade; no token at all gives an
/// anonymous connection that can join rooms but not identify.
pub async fn live_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<LiveParams>,
    headers: HeaderMap,
) -> Result<Response> {
    let token = match bearer_token(&headers)? {
        Some(token) => Some(token),
        None => params.token.filter(|t| !t.trim().is_empty()),
    };

    let user = match token {
        Some(token) => Some(state.auth.validate_session(&token).await?.id),
        None => None,
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: Option<UserId>) {
    let (conn, rx) = state.hub.connect(user.clone());
    info!(connection = %conn, user = ?user, "Live connection opened");

    let (ws_tx, mut ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        conn.clone(),
        state.config.heartbeat_interval(),
    ));

    let router = state.router.clone();
    let reader_conn = conn.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    router.handle_text(&reader_conn, text.as_str()).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(connection = %reader_conn, "Live read error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.router.disconnect(&conn);
}

async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerEvent>,
    conn: ConnectionId,
    heartbeat: Duration,
) {
    let mut ping_interval = tokio::time::interval(heartbeat);
    ping_interval.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(connection = %conn, "Failed to encode {}: {}", event.kind(), e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
                trace!(connection = %conn, "Sent ping");
            }
        }
    }

    let _ = ws_tx.close().await;
}
