use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use mercury_core::ids;
use mercury_push::Client;
use serde::Deserialize;
use tracing;

use crate::auth;
use crate::state::ApiState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: String,
}

/// Authenticated WebSocket handshake. The token rides a query parameter
/// because browsers cannot set headers on WebSocket upgrades.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    Extension(state): Extension<ApiState>,
) -> Response {
    let claims = match auth::verify_token(&query.token, &state.ctx.config.server.jwt_secret) {
        Ok(claims) => claims,
        Err(status) => return status.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, claims, state))
}

async fn handle_socket(socket: WebSocket, claims: auth::Claims, state: ApiState) {
    if state.registry.is_shutdown() {
        return;
    }

    let user_uuid = claims.user_uuid;
    let device_id = claims.device_id;
    let connection_id = ids::new_connection_id();

    tracing::info!(
        "WebSocket connected: user={} device={} conn={}",
        user_uuid,
        device_id,
        connection_id
    );

    let (client, mut outbound_rx) = Client::new(
        user_uuid.clone(),
        device_id.clone(),
        connection_id.clone(),
        state.ctx.config.fanout.outbound_queue_size,
    );

    // One live connection per (user, device): the replaced one is closed and
    // its late unregister cannot evict us (pointer-identity check).
    if let Some(replaced) = state.registry.register(client.clone()) {
        tracing::info!(
            "Replacing connection for user={} device={}",
            user_uuid,
            device_id
        );
        replaced.close();
    }

    state.syncer.touch(&user_uuid, &device_id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drain the outbound queue in insertion order, ping on an
    // interval, fail the client on write error or heartbeat timeout.
    let writer_client = client.clone();
    let heartbeat_interval = state.ctx.config.fanout.heartbeat_interval();
    let heartbeat_timeout = state.ctx.config.fanout.heartbeat_timeout();
    let mut writer_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            tokio::select! {
                _ = writer_client.wait_closed() => break,
                maybe = outbound_rx.recv() => {
                    match maybe {
                        Some(bytes) => {
                            if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    let idle = Utc::now().timestamp() - writer_client.last_heartbeat_unix();
                    if idle > heartbeat_timeout.as_secs() as i64 {
                        tracing::info!(
                            "Reaping idle connection: user={} device={}",
                            writer_client.user_uuid(),
                            writer_client.device_id()
                        );
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader: any inbound frame counts as liveness and device activity.
    let reader_client = client.clone();
    let reader_state = state.clone();
    let reader_user = user_uuid.clone();
    let reader_device = device_id.clone();
    let mut reader_task = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Close(_)) => break,
                Ok(_) => {
                    reader_client.touch_heartbeat();
                    reader_state.syncer.touch(&reader_user, &reader_device);
                }
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer_task => reader_task.abort(),
        _ = &mut reader_task => writer_task.abort(),
    }

    client.close();
    state.registry.unregister(&client);

    tracing::info!(
        "WebSocket closed: user={} device={} conn={}",
        user_uuid,
        device_id,
        connection_id
    );
}
