//! In-memory task/task-result store backing the dashboard API and the
//! Dispatcher. Sits behind the same persistence boundary as
//! `device_store::DeviceStore`.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use rmm_protocol::caps::{truncate_utf8, STDERR_CAP_BYTES, STDOUT_CAP_BYTES};
use rmm_protocol::{DeviceId, Task, TaskResult};

pub struct TaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    results: RwLock<HashMap<Uuid, TaskResult>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, task: Task) {
        self.tasks.write().await.insert(task.id, task);
    }

    pub async fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Marks a task cancelled via `Task::cancel`, which keeps `cancelled`
    /// and `status` in sync.
    pub async fn cancel(&self, id: Uuid) -> bool {
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            task.cancel();
            true
        } else {
            false
        }
    }

    pub async fn mark_dispatched(&self, id: Uuid) {
        use rmm_protocol::TaskStatus;
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            if !task.cancelled {
                task.status = TaskStatus::Dispatched;
            }
        }
    }

    /// Creates a `running` stub result row for one device at dispatch time,
    /// so pending devices are visible before any agent reports back.
    pub async fn create_running_stub(&self, task_id: Uuid, device_id: DeviceId) -> TaskResult {
        let stub = TaskResult::new_running_stub(task_id, device_id, Utc::now());
        self.results.write().await.insert(stub.id, stub.clone());
        stub
    }

    pub async fn apply_result(
        &self,
        task_id: Uuid,
        device_id: DeviceId,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    ) {
        use rmm_protocol::ResultStatus;
        let stdout = truncate_utf8(&stdout, STDOUT_CAP_BYTES);
        let stderr = truncate_utf8(&stderr, STDERR_CAP_BYTES);
        let mut results = self.results.write().await;
        let existing = results
            .values_mut()
            .find(|r| r.task_id == task_id && r.device_id == device_id && r.completed_at.is_none());
        let status = match exit_code {
            Some(0) => ResultStatus::Completed,
            Some(_) => ResultStatus::Failed,
            None => ResultStatus::Failed,
        };
        if let Some(result) = existing {
            result.exit_code = exit_code;
            result.stdout = stdout;
            result.stderr = stderr;
            result.status = status;
            result.progress = 100;
            result.completed_at = Some(Utc::now());
        } else {
            let mut stub = TaskResult::new_running_stub(task_id, device_id, Utc::now());
            stub.exit_code = exit_code;
            stub.stdout = stdout;
            stub.stderr = stderr;
            stub.status = status;
            stub.progress = 100;
            stub.completed_at = Some(Utc::now());
            results.insert(stub.id, stub);
        }
    }

    /// Fails the running stub created at dispatch time when the push to the
    /// agent itself never went out (congested outbound channel), rather than
    /// waiting on a `task_result` that will never arrive.
    pub async fn mark_push_failed(&self, task_id: Uuid, device_id: DeviceId, reason: &str) {
        use rmm_protocol::ResultStatus;
        let mut results = self.results.write().await;
        if let Some(result) = results
            .values_mut()
            .find(|r| r.task_id == task_id && r.device_id == device_id && r.completed_at.is_none())
        {
            result.status = ResultStatus::Failed;
            result.stderr = reason.to_string();
            result.completed_at = Some(Utc::now());
        }
    }

    pub async fn append_output(&self, task_id: Uuid, device_id: DeviceId, chunk: &str, progress: u8) {
        let mut results = self.results.write().await;
        if let Some(result) = results
            .values_mut()
            .find(|r| r.task_id == task_id && r.device_id == device_id && r.completed_at.is_none())
        {
            result.append_stdout_line(chunk);
            result.progress = progress;
        }
    }

    pub async fn results_for_task(&self, task_id: Uuid) -> Vec<TaskResult> {
        self.results
            .read()
            .await
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmm_protocol::{ScriptType, TargetSelector, TaskStatus, Trigger};

    fn sample_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            name: "inventory".into(),
            script_type: ScriptType::Bash,
            script_body: "echo hi".into(),
            target: TargetSelector::AllOnline,
            trigger: Trigger::Now,
            status: TaskStatus::Pending,
            cancelled: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_visible() {
        let store = TaskStore::new();
        let task = sample_task();
        let id = task.id;
        store.insert(task).await;
        assert!(store.cancel(id).await);
        let fetched = store.get(id).await.unwrap();
        assert!(fetched.cancelled);
        assert_eq!(fetched.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn apply_result_caps_oversized_stdout_and_stderr() {
        let store = TaskStore::new();
        let task_id = Uuid::new_v4();
        let device_id = DeviceId::new();
        store.create_running_stub(task_id, device_id).await;

        let huge_stdout = "o".repeat(STDOUT_CAP_BYTES * 2);
        let huge_stderr = "e".repeat(STDERR_CAP_BYTES * 2);
        store
            .apply_result(task_id, device_id, Some(0), huge_stdout, huge_stderr)
            .await;

        let results = store.results_for_task(task_id).await;
        assert_eq!(results[0].stdout.len(), STDOUT_CAP_BYTES);
        assert_eq!(results[0].stderr.len(), STDERR_CAP_BYTES);
    }

    #[tokio::test]
    async fn apply_result_completes_the_running_stub() {
        let store = TaskStore::new();
        let task_id = Uuid::new_v4();
        let device_id = DeviceId::new();
        let stub = store.create_running_stub(task_id, device_id).await;
        assert_eq!(stub.status, rmm_protocol::ResultStatus::Running);

        store
            .apply_result(task_id, device_id, Some(0), "ok".into(), String::new())
            .await;
        let results = store.results_for_task(task_id).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, rmm_protocol::ResultStatus::Completed);
        assert_eq!(results[0].exit_code, Some(0));
    }

    #[tokio::test]
    async fn mark_push_failed_fails_the_running_stub_with_the_given_reason() {
        let store = TaskStore::new();
        let task_id = Uuid::new_v4();
        let device_id = DeviceId::new();
        store.create_running_stub(task_id, device_id).await;

        store
            .mark_push_failed(task_id, device_id, "push dropped: agent slow")
            .await;

        let results = store.results_for_task(task_id).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, rmm_protocol::ResultStatus::Failed);
        assert_eq!(results[0].stderr, "push dropped: agent slow");
    }
}
