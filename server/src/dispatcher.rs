//! Dispatcher: resolves a `Task`'s `TargetSelector` into concrete device
//! ids, creates the `running` result stubs, and pushes a `run_task`
//! (trigger `Now`) or `schedule_task` (every other trigger) envelope
//! straight through the Connection Registry to each resolved device, one
//! send per device so a single congested agent can't block the rest of
//! the fan-out.

use std::sync::Arc;

use rmm_protocol::{CachedTask, DeviceId, Task, TargetSelector, Trigger, WsMessage};
use uuid::Uuid;

use crate::device_store::DeviceStore;
use crate::state::{ConnectionRegistry, PushBus, PushEnvelope, PushTarget, SendOutcome};
use crate::task_store::TaskStore;

pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    push_bus: PushBus,
    device_store: Arc<dyn DeviceStore>,
    task_store: Arc<TaskStore>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        push_bus: PushBus,
        device_store: Arc<dyn DeviceStore>,
        task_store: Arc<TaskStore>,
    ) -> Self {
        Self {
            registry,
            push_bus,
            device_store,
            task_store,
        }
    }

    /// Resolves `task.target` against the Device Store. `Platform` is
    /// "all online devices of this platform tag" — same online-only scope
    /// as `AllOnline`, just narrowed by the durable platform record, so an
    /// offline device of the matching platform is never handed a stub.
    async fn resolve_targets(&self, task: &Task) -> Vec<DeviceId> {
        match &task.target {
            TargetSelector::Device { device_id } => vec![*device_id],
            TargetSelector::AllOnline => self.registry.online_device_ids(),
            TargetSelector::Platform { platform } => self
                .device_store
                .list_by_platform(*platform)
                .await
                .into_iter()
                .filter(|d| d.status == rmm_protocol::DeviceStatus::Online)
                .map(|d| d.device_id)
                .collect(),
        }
    }

    /// Dispatches `task` now: creates a running stub per resolved device and
    /// pushes either an immediate `run_task` (trigger `Now`) or a
    /// `schedule_task` (every other trigger, so the agent caches and
    /// evaluates it locally). Pushed directly through the registry (not the
    /// Push Bus) so a congested outbound channel can be reflected back into
    /// the stub instead of silently vanishing into a log line.
    pub async fn dispatch(&self, task: &Task) -> usize {
        if task.cancelled {
            return 0;
        }
        let targets = self.resolve_targets(task).await;
        for device_id in &targets {
            self.task_store
                .create_running_stub(task.id, *device_id)
                .await;
            let payload = self.envelope_for(task);
            let outcome = self.registry.send_one(device_id, payload).await;
            if outcome == SendOutcome::Congested {
                self.task_store
                    .mark_push_failed(task.id, *device_id, "push dropped: agent slow")
                    .await;
            }
        }
        self.task_store.mark_dispatched(task.id).await;
        targets.len()
    }

    fn envelope_for(&self, task: &Task) -> WsMessage {
        match task.trigger {
            Trigger::Now => WsMessage::RunTask {
                task_id: task.id,
                name: task.name.clone(),
                script_type: task.script_type,
                script_body: task.script_body.clone(),
            },
            _ => WsMessage::ScheduleTask {
                data: CachedTask {
                    task_id: task.id,
                    name: task.name.clone(),
                    script_type: task.script_type,
                    script_body: task.script_body.clone(),
                    trigger: task.trigger.clone(),
                    cancelled: task.cancelled,
                    last_run: None,
                },
            },
        }
    }

    /// Propagates a dashboard cancellation to every online target
    /// immediately; offline devices pick up `cancelled: true` on their next
    /// `schedule_task` delivery or simply stop being dispatched again.
    pub async fn cancel(&self, task_id: Uuid) -> bool {
        let cancelled = self.task_store.cancel(task_id).await;
        if cancelled {
            self.push_bus
                .publish(PushEnvelope {
                    target: PushTarget::All,
                    payload: WsMessage::CancelTask { task_id },
                })
                .await;
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_store::InMemoryDeviceStore;
    use chrono::Utc;
    use rmm_protocol::{ScriptType, TaskStatus};

    fn sample_task(target: TargetSelector, trigger: Trigger) -> Task {
        Task {
            id: Uuid::new_v4(),
            name: "inventory".into(),
            script_type: ScriptType::Bash,
            script_body: "echo hi".into(),
            target,
            trigger,
            status: TaskStatus::Pending,
            cancelled: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatch_to_device_creates_one_stub_even_when_offline() {
        let registry = Arc::new(ConnectionRegistry::new());
        let push_bus = PushBus::spawn(registry.clone());
        let device_store: Arc<dyn DeviceStore> = InMemoryDeviceStore::shared();
        let task_store = Arc::new(TaskStore::new());
        let dispatcher = Dispatcher::new(registry, push_bus, device_store, task_store.clone());

        let device_id = DeviceId::new();
        let task = sample_task(TargetSelector::Device { device_id }, Trigger::Interval {
            interval_seconds: 3600,
        });
        let count = dispatcher.dispatch(&task).await;
        assert_eq!(count, 1);
        assert_eq!(task_store.results_for_task(task.id).await.len(), 1);
    }

    #[tokio::test]
    async fn platform_target_excludes_offline_devices_of_that_platform() {
        let registry = Arc::new(ConnectionRegistry::new());
        let push_bus = PushBus::spawn(registry.clone());
        let device_store = InMemoryDeviceStore::shared();

        let online = DeviceId::new();
        let offline = DeviceId::new();
        device_store
            .upsert_checkin(online, rmm_protocol::Platform::Windows, "a".into(), "1".into(), "Win 11".into())
            .await;
        device_store
            .upsert_checkin(offline, rmm_protocol::Platform::Windows, "b".into(), "1".into(), "Win 11".into())
            .await;
        device_store.mark_online(online).await;
        // `offline` is left at its default `DeviceStatus::Offline`.

        let task_store = Arc::new(TaskStore::new());
        let store_handle: Arc<dyn DeviceStore> = device_store.clone();
        let dispatcher = Dispatcher::new(registry, push_bus, store_handle, task_store.clone());

        let task = sample_task(
            TargetSelector::Platform {
                platform: rmm_protocol::Platform::Windows,
            },
            Trigger::Now,
        );
        let count = dispatcher.dispatch(&task).await;
        assert_eq!(count, 1);

        let results = task_store.results_for_task(task.id).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].device_id, online);
    }

    #[tokio::test]
    async fn dispatch_skips_cancelled_task() {
        let registry = Arc::new(ConnectionRegistry::new());
        let push_bus = PushBus::spawn(registry.clone());
        let device_store: Arc<dyn DeviceStore> = InMemoryDeviceStore::shared();
        let task_store = Arc::new(TaskStore::new());
        let dispatcher = Dispatcher::new(registry, push_bus, device_store, task_store.clone());

        let mut task = sample_task(TargetSelector::AllOnline, Trigger::Now);
        task.cancel();
        assert_eq!(dispatcher.dispatch(&task).await, 0);
    }
}
