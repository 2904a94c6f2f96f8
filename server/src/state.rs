//! Connection Registry and Push Bus.
//!
//! Both are constructed once in `main.rs` and threaded through `AppState` —
//! never reached through an ambient global. Sessions are tracked in a
//! `DashMap` keyed by device id, each with its own `mpsc` outbound queue;
//! the Push Bus sits in front of the registry so callers can target a
//! device or broadcast without knowing whether a session currently exists.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use rmm_protocol::{DeviceId, WsMessage};

use crate::device_store::DeviceStore;

/// How long `SendOne`/`SendAll` will wait for a congested writer channel
/// before giving up.
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Bound on each agent's outbound message queue.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// Outcome of a registry send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    NoSuchSession,
    /// A session exists but its outbound channel didn't drain within
    /// `SEND_TIMEOUT` — the agent is connected but not keeping up.
    Congested,
}

/// One live agent session, owned exclusively by the `ConnectionRegistry` for
/// the lifetime of its WebSocket.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    tx: mpsc::Sender<WsMessage>,
    close: Arc<Notify>,
}

impl SessionHandle {
    /// Creates a handle plus the receiver the connection task should drain
    /// to serialize and write outbound frames, and the notifier it should
    /// select on to know when to close.
    pub fn new() -> (Self, mpsc::Receiver<WsMessage>, Arc<Notify>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let close = Arc::new(Notify::new());
        let id = {
            use std::sync::atomic::{AtomicU64, Ordering};
            static NEXT: AtomicU64 = AtomicU64::new(1);
            NEXT.fetch_add(1, Ordering::Relaxed)
        };
        (
            Self {
                id,
                tx,
                close: close.clone(),
            },
            rx,
            close,
        )
    }

    fn identity_eq(&self, other: &Self) -> bool {
        self.id == other.id
    }

    /// Signals the owning connection task to stop reading/writing and close
    /// its WebSocket.
    pub fn request_close(&self) {
        self.close.notify_waiters();
    }
}

/// Process-wide mapping device-id → live agent session handle. At most one
/// handle per device id at any instant.
pub struct ConnectionRegistry {
    sessions: DashMap<DeviceId, SessionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Registers `handle` for `device_id`. If a prior handle exists it is
    /// closed first, so at most one live session per device id ever exists.
    ///
    /// Also flips the device's durable status to `online`.
    pub async fn register(
        &self,
        device_id: DeviceId,
        handle: SessionHandle,
        device_store: &dyn DeviceStore,
    ) {
        if let Some((_, old)) = self.sessions.remove(&device_id) {
            old.request_close();
        }
        self.sessions.insert(device_id, handle);
        device_store.mark_online(device_id).await;
        info!(%device_id, "session registered");
    }

    /// Removes the registration for `device_id` only if `handle` is still
    /// the one currently registered — a late close of a superseded session
    /// must not evict its replacement.
    pub async fn unregister(
        &self,
        device_id: DeviceId,
        handle: &SessionHandle,
        device_store: &dyn DeviceStore,
    ) {
        let removed = self
            .sessions
            .remove_if(&device_id, |_, current| current.identity_eq(handle))
            .is_some();
        if removed {
            device_store.mark_offline(device_id).await;
            info!(%device_id, "session unregistered");
        }
    }

    pub fn is_registered(&self, device_id: &DeviceId) -> bool {
        self.sessions.contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Enqueues `message` for `device_id`'s writer channel.
    pub async fn send_one(&self, device_id: &DeviceId, message: WsMessage) -> SendOutcome {
        let Some(handle) = self.sessions.get(device_id).map(|e| e.value().clone()) else {
            return SendOutcome::NoSuchSession;
        };
        match tokio::time::timeout(SEND_TIMEOUT, handle.tx.send(message)).await {
            Ok(Ok(())) => SendOutcome::Delivered,
            _ => {
                warn!(%device_id, "push dropped: agent slow");
                SendOutcome::Congested
            }
        }
    }

    /// Best-effort fan-out to every registered handle.
    pub async fn send_all(&self, message: WsMessage) {
        let handles: Vec<(DeviceId, SessionHandle)> = self
            .sessions
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        for (device_id, handle) in handles {
            if tokio::time::timeout(SEND_TIMEOUT, handle.tx.send(message.clone()))
                .await
                .is_err()
            {
                warn!(%device_id, "push dropped (broadcast): agent slow");
            }
        }
    }

    /// All device ids with a live session, used by the Dispatcher to resolve
    /// `all-online` / platform-filtered targets together with the Device
    /// Store's richer device records.
    pub fn online_device_ids(&self) -> Vec<DeviceId> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One command to deliver to an agent, decoupled from whether a session
/// exists yet.
#[derive(Debug, Clone)]
pub struct PushEnvelope {
    pub target: PushTarget,
    pub payload: WsMessage,
}

#[derive(Debug, Clone, Copy)]
pub enum PushTarget {
    Device(DeviceId),
    All,
}

/// Handle producers use to publish onto the Push Bus without knowing which
/// sessions currently exist.
#[derive(Clone)]
pub struct PushBus {
    tx: mpsc::Sender<PushEnvelope>,
}

/// Capacity of the bus channel itself; publishers backpressure here before
/// any per-device drop policy even applies.
const PUSH_BUS_CAPACITY: usize = 256;

impl PushBus {
    /// Builds the bus and spawns its single subscriber task, which drains
    /// envelopes and calls `Registry.SendOne`/`SendAll`. This in-process
    /// channel is a stand-in for an external broker (e.g. Redis pub/sub);
    /// the `DeviceStore`/`PushBus` boundary is designed so that backend can
    /// be swapped in without touching the session or dispatch code.
    pub fn spawn(registry: Arc<ConnectionRegistry>) -> Self {
        let (tx, mut rx) = mpsc::channel::<PushEnvelope>(PUSH_BUS_CAPACITY);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match envelope.target {
                    PushTarget::Device(id) => {
                        registry.send_one(&id, envelope.payload).await;
                    }
                    PushTarget::All => {
                        registry.send_all(envelope.payload).await;
                    }
                }
            }
        });
        Self { tx }
    }

    pub async fn publish(&self, envelope: PushEnvelope) {
        if self.tx.send(envelope).await.is_err() {
            warn!("push bus closed, envelope dropped");
        }
    }
}

/// Shared application state, cloned and passed to each request/session
/// handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub push_bus: PushBus,
    pub device_store: Arc<dyn DeviceStore>,
    pub task_store: Arc<crate::task_store::TaskStore>,
    pub dispatcher: Arc<crate::dispatcher::Dispatcher>,
    pub config: Arc<crate::config::ServerConfig>,
}

impl AppState {
    pub fn new(
        device_store: Arc<dyn DeviceStore>,
        task_store: Arc<crate::task_store::TaskStore>,
        config: Arc<crate::config::ServerConfig>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let push_bus = PushBus::spawn(registry.clone());
        let dispatcher = Arc::new(crate::dispatcher::Dispatcher::new(
            registry.clone(),
            push_bus.clone(),
            device_store.clone(),
            task_store.clone(),
        ));
        Self {
            registry,
            push_bus,
            device_store,
            task_store,
            dispatcher,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_store::InMemoryDeviceStore;

    #[tokio::test]
    async fn register_replaces_and_closes_prior_handle() {
        let registry = ConnectionRegistry::new();
        let store = InMemoryDeviceStore::new();
        let device_id = DeviceId::new();

        let (handle1, _rx1, close1) = SessionHandle::new();
        registry.register(device_id, handle1.clone(), &store).await;
        assert!(registry.is_registered(&device_id));

        let (handle2, _rx2, _close2) = SessionHandle::new();
        registry.register(device_id, handle2.clone(), &store).await;

        assert!(tokio::time::timeout(Duration::from_millis(50), close1.notified())
            .await
            .is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unregister_is_identity_scoped() {
        let registry = ConnectionRegistry::new();
        let store = InMemoryDeviceStore::new();
        let device_id = DeviceId::new();

        let (handle1, _rx1, _c1) = SessionHandle::new();
        registry.register(device_id, handle1.clone(), &store).await;
        let (handle2, _rx2, _c2) = SessionHandle::new();
        registry.register(device_id, handle2.clone(), &store).await;

        // a late unregister of the superseded handle must not evict handle2
        registry.unregister(device_id, &handle1, &store).await;
        assert!(registry.is_registered(&device_id));

        registry.unregister(device_id, &handle2, &store).await;
        assert!(!registry.is_registered(&device_id));
    }

    #[tokio::test]
    async fn send_one_reports_congested_when_the_outbound_queue_never_drains() {
        let registry = ConnectionRegistry::new();
        let store = InMemoryDeviceStore::new();
        let device_id = DeviceId::new();

        let (handle, _rx, _close) = SessionHandle::new();
        registry.register(device_id, handle, &store).await;

        // fill the bounded outbound queue with nobody reading from `_rx`
        for _ in 0..OUTBOUND_CHANNEL_CAPACITY {
            let outcome = registry
                .send_one(
                    &device_id,
                    WsMessage::CancelTask {
                        task_id: uuid::Uuid::new_v4(),
                    },
                )
                .await;
            assert_eq!(outcome, SendOutcome::Delivered);
        }

        let outcome = registry
            .send_one(
                &device_id,
                WsMessage::CancelTask {
                    task_id: uuid::Uuid::new_v4(),
                },
            )
            .await;
        assert_eq!(outcome, SendOutcome::Congested);
    }

    #[tokio::test]
    async fn send_one_reports_no_such_session() {
        let registry = ConnectionRegistry::new();
        let outcome = registry
            .send_one(
                &DeviceId::new(),
                WsMessage::CancelTask {
                    task_id: uuid::Uuid::new_v4(),
                },
            )
            .await;
        assert_eq!(outcome, SendOutcome::NoSuchSession);
    }
}
