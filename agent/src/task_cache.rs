//! Local task cache: durable on-disk list of `CachedTask` records, written
//! via atomic replace — a real temp-file-then-rename on every mutation, not
//! an in-place write.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use rmm_protocol::CachedTask;

use crate::error::AgentError;

async fn read_all(path: &Path) -> Vec<CachedTask> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

async fn write_all(path: &Path, tasks: &[CachedTask]) -> Result<(), AgentError> {
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let bytes = serde_json::to_vec_pretty(tasks)?;
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Loss-tolerant cache of the tasks scheduled on this device — regenerated
/// from the server on the next successful check-in if lost. Kept in memory
/// behind a lock and mirrored to disk on every mutation so a crash loses at
/// most the in-flight write.
pub struct CachedTaskStore {
    path: PathBuf,
    tasks: RwLock<Vec<CachedTask>>,
}

impl CachedTaskStore {
    pub async fn load(path: PathBuf) -> Self {
        let tasks = read_all(&path).await;
        Self {
            path,
            tasks: RwLock::new(tasks),
        }
    }

    pub async fn load_all(&self) -> Vec<CachedTask> {
        self.tasks.read().await.clone()
    }

    /// Replaces the whole cache — used to seed from the check-in response.
    pub async fn replace_all(&self, tasks: Vec<CachedTask>) -> Result<(), AgentError> {
        write_all(&self.path, &tasks).await?;
        *self.tasks.write().await = tasks;
        Ok(())
    }

    /// Inserts, or replaces if a task with the same id is already cached.
    pub async fn upsert(&self, task: CachedTask) -> Result<(), AgentError> {
        let mut tasks = self.tasks.write().await;
        tasks.retain(|t| t.task_id != task.task_id);
        tasks.push(task);
        write_all(&self.path, &tasks).await
    }

    pub async fn remove(&self, task_id: Uuid) -> Result<(), AgentError> {
        let mut tasks = self.tasks.write().await;
        tasks.retain(|t| t.task_id != task_id);
        write_all(&self.path, &tasks).await
    }

    pub async fn mark_cancelled(&self, task_id: Uuid) -> Result<(), AgentError> {
        let mut tasks = self.tasks.write().await;
        for t in tasks.iter_mut() {
            if t.task_id == task_id {
                t.cancelled = true;
            }
        }
        write_all(&self.path, &tasks).await
    }

    pub async fn mark_ran(&self, task_id: Uuid) -> Result<(), AgentError> {
        let mut tasks = self.tasks.write().await;
        for t in tasks.iter_mut() {
            if t.task_id == task_id {
                t.last_run = Some(Utc::now());
            }
        }
        write_all(&self.path, &tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmm_protocol::{ScriptType, Trigger};

    fn sample(id: Uuid) -> CachedTask {
        CachedTask {
            task_id: id,
            name: "inventory".into(),
            script_type: ScriptType::Bash,
            script_body: "echo hi".into(),
            trigger: Trigger::Now,
            cancelled: false,
            last_run: None,
        }
    }

    fn tmp_path() -> PathBuf {
        std::env::temp_dir().join(format!("rmm-cache-test-{}.json", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn upsert_replaces_existing_entry() {
        let path = tmp_path();
        let store = CachedTaskStore::load(path.clone()).await;
        let id = Uuid::new_v4();
        store.upsert(sample(id)).await.unwrap();
        let mut updated = sample(id);
        updated.name = "renamed".into();
        store.upsert(updated).await.unwrap();

        let all = store.load_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "renamed");
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn mark_cancelled_flags_without_removing() {
        let path = tmp_path();
        let store = CachedTaskStore::load(path.clone()).await;
        let id = Uuid::new_v4();
        store.upsert(sample(id)).await.unwrap();
        store.mark_cancelled(id).await.unwrap();
        let all = store.load_all().await;
        assert_eq!(all.len(), 1);
        assert!(all[0].cancelled);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let path = tmp_path();
        let store = CachedTaskStore::load(path.clone()).await;
        let id = Uuid::new_v4();
        store.upsert(sample(id)).await.unwrap();
        store.remove(id).await.unwrap();
        assert!(store.load_all().await.is_empty());
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn reload_reads_persisted_state() {
        let path = tmp_path();
        let id = Uuid::new_v4();
        {
            let store = CachedTaskStore::load(path.clone()).await;
            store.upsert(sample(id)).await.unwrap();
        }
        let reloaded = CachedTaskStore::load(path.clone()).await;
        assert_eq!(reloaded.load_all().await.len(), 1);
        let _ = tokio::fs::remove_file(&path).await;
    }
}
