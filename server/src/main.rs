//! # Sovereign RMM control-plane server
//!
//! Accepts agent WebSocket sessions, keeps the Connection Registry and Push
//! Bus that let the dashboard reach a device regardless of which agent
//! opened the connection, and serves the check-in/dashboard REST API.
//!
//! ## Architecture
//!
//! ```text
//! Agent ──WS──► Connection Registry ◄──Push Bus── Dispatcher ◄── Dashboard API
//!                       │
//!                  Device Store / Task Store
//! ```
//!
//! ## Modules
//!
//! - [`config`]       — CLI/env configuration
//! - [`error`]         — `ServerError`, mapped to HTTP status codes
//! - [`state`]         — Connection Registry, Push Bus, `AppState`
//! - [`device_store`]  — device persistence boundary
//! - [`task_store`]    — task/task-result persistence boundary
//! - [`dispatcher`]    — resolves targets and pushes/schedules tasks
//! - [`session`]       — agent WebSocket lifecycle and message dispatch
//! - [`api`]           — check-in + dashboard REST endpoints

mod api;
mod config;
mod device_store;
mod dispatcher;
mod error;
mod session;
mod state;
mod task_store;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::device_store::InMemoryDeviceStore;
use crate::state::AppState;
use crate::task_store::TaskStore;

/// Server entry point: parses configuration, builds shared state, and
/// starts listening for agent sessions and dashboard requests.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rmm_server=info".into()),
        )
        .init();

    let config = config::ServerConfig::parse();
    if config.database_url.is_none() {
        info!("no DATABASE_URL set; devices/tasks are held in an in-memory store for this run");
    }
    if config.redis_url.is_none() {
        info!("no REDIS_URL set; push dispatch uses the in-process bus");
    }

    let device_store = InMemoryDeviceStore::shared();
    let task_store = Arc::new(TaskStore::new());
    let state = AppState::new(device_store, task_store, Arc::new(config.clone()));

    let app = Router::new()
        .route("/api/health", get(api::health))
        .route("/ws/agent/{device_id}", get(session::ws_handler))
        .route("/api/agent/checkin", post(api::checkin))
        .route("/api/devices", get(api::list_devices))
        .route("/api/devices/{device_id}", get(api::get_device))
        .route("/api/dashboard/tasks", post(api::create_task))
        .route("/api/dashboard/tasks/{task_id}", get(api::get_task))
        .route(
            "/api/dashboard/tasks/{task_id}/dispatch",
            post(api::dispatch_task),
        )
        .route(
            "/api/dashboard/tasks/{task_id}/cancel",
            post(api::cancel_task),
        )
        .route(
            "/api/dashboard/tasks/{task_id}/results",
            get(api::task_results),
        )
        .route("/api/policy", put(api::set_policy))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = config.bind_addr();
    info!("rmm-server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
