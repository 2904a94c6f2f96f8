//! Agent-side session: connects to the selected server endpoint,
//! authenticates with the shared token, and runs the duplex message loop
//! until disconnect, then reconnects. The socket is split into sink/stream
//! halves with an `mpsc` outbound queue; heartbeat cadence is driven by the
//! adaptive heartbeat interval rather than a fixed ping.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use rmm_protocol::WsMessage;

use crate::executor;
use crate::heartbeat;
use crate::hardware::{HardwareCollector, SysinfoHardwareCollector};
use crate::state::AgentState;

/// Flat reconnect backoff; the agent is expected to be patient, not
/// aggressive, about reconnecting.
const RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Bound on the outbound queue, mirroring the server's registry channel.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Runs the agent's WebSocket session loop forever. Never returns.
pub async fn run_loop(state: Arc<AgentState>) -> ! {
    loop {
        let server_ip = state.reachability.select().await;
        let port = state.reachability.port();
        let url = format!(
            "ws://{server_ip}:{port}/ws/agent/{}?token={}",
            state.device_id, state.config.agent_token
        );
        info!(%url, "connecting agent session");

        match connect_async(&url).await {
            Ok((ws_stream, _)) => {
                info!("agent session open");
                run_connected(&state, ws_stream).await;
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
            }
        }

        state.set_session(None).await;
        state.reachability.invalidate().await;
        warn!("disconnected, reconnecting in {:?}", RECONNECT_DELAY);
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn run_connected(
    state: &Arc<AgentState>,
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) {
    let (mut sink, mut stream) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(OUTBOUND_CHANNEL_CAPACITY);
    state.set_session(Some(tx.clone())).await;

    let outbound = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_state = state.clone();
    let heartbeat_tx = tx.clone();
    let heartbeat_task = tokio::spawn(async move {
        run_heartbeat(heartbeat_state, heartbeat_tx).await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<WsMessage>(&text) {
                Ok(msg) => handle_message(state, msg).await,
                Err(e) => warn!(error = %e, "dropping malformed frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "transport error");
                break;
            }
        }
    }

    heartbeat_task.abort();
    outbound.abort();
}

/// Sends the telemetry snapshot and reschedules itself at the policy-driven
/// interval after every send — the interval is reevaluated after every
/// send, not fixed for the life of the session.
async fn run_heartbeat(state: Arc<AgentState>, tx: mpsc::Sender<WsMessage>) {
    loop {
        let local_ip = crate::reachability::local_ip_address().await;
        let telemetry = heartbeat::collect(local_ip).await;
        let policy = state.policy.read().await.clone();
        let delay = heartbeat::next_interval(&telemetry, &policy.bands);

        if tx
            .send(WsMessage::Heartbeat { data: telemetry })
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

/// Dispatches one inbound server→agent frame. Any error here is logged and
/// the session continues — only a transport error (handled in the caller's
/// read loop) closes it.
async fn handle_message(state: &Arc<AgentState>, msg: WsMessage) {
    match msg {
        WsMessage::RunTask {
            task_id,
            script_type,
            script_body,
            ..
        } => {
            let state = state.clone();
            tokio::spawn(async move {
                let tx = state.ws_tx.read().await.clone();
                let result = executor::run_task(task_id, script_type, &script_body, tx).await;
                state
                    .try_send(WsMessage::TaskResult { data: result })
                    .await;
                state
                    .try_send(WsMessage::TaskOutput {
                        task_id,
                        output: String::new(),
                        progress: 100,
                    })
                    .await;
            });
        }
        WsMessage::ScheduleTask { data } => {
            info!(task_id = %data.task_id, name = %data.name, "scheduled task received");
            if let Err(e) = state.task_cache.upsert(data).await {
                warn!(error = %e, "failed to persist scheduled task");
            }
        }
        WsMessage::CancelTask { task_id } => {
            if let Err(e) = state.task_cache.mark_cancelled(task_id).await {
                warn!(error = %e, "failed to persist cancellation");
            }
        }
        WsMessage::UpdatePolicy { data } => {
            *state.policy.write().await = data;
        }
        WsMessage::DiskScanRequest {} => {
            let state = state.clone();
            tokio::spawn(async move {
                let details = SysinfoHardwareCollector.disk_scan();
                state.try_send(WsMessage::DiskScan { details }).await;
            });
        }
        other => {
            warn!(?other, "unexpected agent-bound message from server");
        }
    }
}
