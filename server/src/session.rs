//! Agent session: WebSocket connection lifecycle for one agent. The socket
//! is split into sink/stream halves; a dedicated task drains the session's
//! outbound `mpsc` queue and writes frames while the main task reads and
//! dispatches inbound ones, with registry cleanup on disconnect either way.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use rmm_protocol::{DeviceId, WsMessage};

use crate::state::{AppState, SessionHandle};

#[derive(Debug, Deserialize)]
pub struct WsAuthParams {
    pub token: String,
}

/// `GET /ws/agent/{device_id}?token=...` — upgrades to a WebSocket
/// regardless of token, then immediately closes with code 4003 on a bad
/// token rather than failing the HTTP upgrade. The agent never sees a
/// `Register` reply either way; only a valid token gets a live session.
pub async fn ws_handler(
    Path(device_id): Path<DeviceId>,
    Query(params): Query<WsAuthParams>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if params.token != state.config.agent_token {
            reject_bad_token(socket, device_id).await;
            return;
        }
        handle_connection(socket, state, device_id).await;
    })
}

/// Closes a freshly-upgraded socket with close code 4003 without ever
/// reading from it.
async fn reject_bad_token(mut socket: WebSocket, device_id: DeviceId) {
    warn!(%device_id, "websocket closed: bad token");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: 4003,
            reason: "bad token".into(),
        })))
        .await;
}

async fn handle_connection(socket: WebSocket, state: AppState, device_id: DeviceId) {
    info!(%device_id, "agent session opening");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (handle, mut rx, close) = SessionHandle::new();

    state
        .registry
        .register(device_id, handle.clone(), state.device_store.as_ref())
        .await;

    let outbound = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = close.notified() => break,
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let text = match serde_json::to_string(&msg) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!(%device_id, error = %e, "failed to serialize outbound message");
                            continue;
                        }
                    };
                    if ws_sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<WsMessage>(&text) {
                Ok(ws_msg) => handle_message(&state, device_id, ws_msg).await,
                Err(e) => warn!(%device_id, error = %e, "dropping malformed frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    outbound.abort();
    state
        .registry
        .unregister(device_id, &handle, state.device_store.as_ref())
        .await;
    info!(%device_id, "agent session closed");
}

/// Dispatches one inbound frame from an agent.
async fn handle_message(state: &AppState, device_id: DeviceId, msg: WsMessage) {
    match msg {
        WsMessage::Heartbeat { data } => {
            state.device_store.record_telemetry(device_id, &data).await;
        }
        WsMessage::TaskResult { data } => {
            state
                .task_store
                .apply_result(data.task_id, device_id, data.exit_code, data.stdout, data.stderr)
                .await;
        }
        WsMessage::TaskOutput {
            task_id,
            output,
            progress,
        } => {
            state
                .task_store
                .append_output(task_id, device_id, &output, progress)
                .await;
        }
        WsMessage::Log { level, message } => {
            info!(%device_id, agent_level = %level, "{message}");
        }
        WsMessage::DiskScan { details } => {
            info!(%device_id, scanned = details.len(), "disk scan received");
            state.device_store.record_disk_scan(device_id, details).await;
        }
        WsMessage::HardwareReport { data } => {
            info!(%device_id, cpu = ?data.cpu_name, "hardware report received");
            state.device_store.record_hardware(device_id, data).await;
        }
        other => {
            warn!(%device_id, ?other, "unexpected server-bound message from agent");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_auth_params_deserializes_from_json() {
        let parsed: WsAuthParams = serde_json::from_str(r#"{"token":"abc123"}"#).unwrap();
        assert_eq!(parsed.token, "abc123");
    }
}
