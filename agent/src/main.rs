//! # Sovereign RMM agent
//!
//! Headless device agent: checks in once over HTTP to learn its policy and
//! scheduled-task backlog, then keeps a WebSocket session open to the
//! control-plane server while the Local Task Cache, Trigger Evaluator, and
//! Event Watcher keep running scheduled work even while disconnected.
//!
//! ## Modules
//!
//! - [`config`]        — CLI/env configuration
//! - [`error`]          — `AgentError`
//! - [`state`]          — shared state threaded through every loop
//! - [`reachability`]   — dual-endpoint server selection (C6)
//! - [`task_cache`]     — local durable task cache (C7)
//! - [`trigger`]        — due-task evaluation (C8)
//! - [`executor`]       — subprocess execution (C9)
//! - [`heartbeat`]      — adaptive telemetry cadence (C10)
//! - [`confirmer`]      — pre-run availability confirmation (C11)
//! - [`hardware`]       — hardware/disk inventory + policy-driven scan timers (C13)
//! - [`checkin`]        — HTTP check-in (C12)
//! - [`session`]        — WebSocket session loop (C4)
//! - [`scheduler`]      — local task runner + event watcher (C8/C9 tying)

mod checkin;
mod confirmer;
mod config;
mod error;
mod executor;
mod hardware;
mod heartbeat;
mod reachability;
mod scheduler;
mod session;
mod state;
mod task_cache;
mod trigger;

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::config::AgentConfig;
use crate::state::AgentState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rmm_agent=info".into()),
        )
        .init();

    let config = Arc::new(AgentConfig::parse());
    if let Err(e) = tokio::fs::create_dir_all(&config.data_dir).await {
        panic!("cannot create data dir {:?}: {e}", config.data_dir);
    }

    let state = Arc::new(AgentState::new(config.clone()).await);
    info!(device_id = %state.device_id, "rmm-agent starting");

    let server_ip = state.reachability.select().await;
    let response = checkin::checkin_until_success(
        &state.http,
        &server_ip,
        state.reachability.port(),
        &config.agent_token,
        state.device_id,
    )
    .await;
    info!(
        registered = response.registered,
        task_count = response.scheduled_tasks.len(),
        "checked in"
    );

    *state.policy.write().await = response.policy;
    if let Err(e) = state.task_cache.replace_all(response.scheduled_tasks).await {
        tracing::warn!(error = %e, "failed to persist check-in task backlog");
    }

    let session_state = state.clone();
    let runner_state = state.clone();
    let watcher_state = state.clone();
    let scan_state = state.clone();

    tokio::join!(
        session::run_loop(session_state),
        scheduler::run_local_task_runner(runner_state),
        scheduler::run_event_watcher(watcher_state),
        hardware::run_scan_loop(scan_state),
    );
}
