//! Shared agent state threaded through every background loop — the
//! WebSocket session, the trigger evaluator tick, and the event watcher all
//! need the same reachability cache, task cache, and "is there a live
//! session to push through right now" slot.
//!
//! Explicitly constructed once in `main.rs` and passed as an `Arc`, never
//! reached through an ambient global — the same principle the server's
//! `AppState` follows.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use rmm_protocol::{DeviceId, Policy, WsMessage};

use crate::config::AgentConfig;
use crate::reachability::ReachabilitySelector;
use crate::task_cache::CachedTaskStore;

pub struct AgentState {
    pub config: Arc<AgentConfig>,
    pub device_id: DeviceId,
    pub reachability: ReachabilitySelector,
    pub task_cache: CachedTaskStore,
    pub http: reqwest::Client,
    pub policy: RwLock<Policy>,
    /// Outbound channel into the currently-open WebSocket session, if any.
    /// `None` while disconnected — scheduled tasks still execute from the
    /// local cache, they just can't stream output until reconnected.
    pub ws_tx: RwLock<Option<mpsc::Sender<WsMessage>>>,
}

impl AgentState {
    pub async fn new(config: Arc<AgentConfig>) -> Self {
        let reachability = ReachabilitySelector::load(&config).await;
        let device_id = reachability.device_id().await;
        let task_cache = CachedTaskStore::load(config.tasks_path()).await;
        let http = reqwest::Client::new();
        Self {
            config,
            device_id,
            reachability,
            task_cache,
            http,
            policy: RwLock::new(Policy::default()),
            ws_tx: RwLock::new(None),
        }
    }

    /// Best-effort push: only does something while a session is open.
    pub async fn try_send(&self, message: WsMessage) {
        if let Some(tx) = self.ws_tx.read().await.as_ref() {
            let _ = tx.send(message).await;
        }
    }

    pub async fn set_session(&self, tx: Option<mpsc::Sender<WsMessage>>) {
        *self.ws_tx.write().await = tx;
    }
}
