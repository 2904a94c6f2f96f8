//! Ties the trigger evaluator, pre-run confirmer, and task executor
//! together into the local task runner loop, plus the event watcher for
//! `event`-triggered tasks.
//!
//! Both loops keep running from the local cache even while the server is
//! unreachable: scheduled tasks still fire from the cache regardless of
//! connection state.

use std::sync::Arc;
use std::time::Duration;

use rmm_protocol::{EventKind, TaskResultPayload, Trigger, WsMessage};
use tracing::{error, info};

use crate::confirmer::{self, Confirmation};
use crate::executor;
use crate::state::AgentState;
use crate::trigger;

/// Tick for the event watcher.
const EVENT_WATCHER_TICK: Duration = Duration::from_secs(15);

/// Runs the local task runner forever: every [`trigger::EVALUATOR_TICK`],
/// evaluates every cached task and executes the ones that are due. Never
/// returns.
pub async fn run_local_task_runner(state: Arc<AgentState>) -> ! {
    loop {
        if let Err(e) = evaluate_and_run_once(&state).await {
            error!(error = %e, "task runner tick failed");
        }
        tokio::time::sleep(trigger::EVALUATOR_TICK).await;
    }
}

async fn evaluate_and_run_once(state: &Arc<AgentState>) -> Result<(), crate::error::AgentError> {
    let tasks = state.task_cache.load_all().await;
    let now = chrono::Utc::now();
    let due: Vec<_> = trigger::due_tasks(&tasks, now).into_iter().cloned().collect();

    for task in due {
        let needs_confirmation = matches!(
            task.trigger,
            Trigger::Once { .. } | Trigger::Interval { .. } | Trigger::Cron { .. }
        );

        if needs_confirmation {
            let server_ip = state.reachability.select().await;
            let outcome = confirmer::confirm(
                &state.http,
                &server_ip,
                state.reachability.port(),
                &state.config.agent_token,
                task.task_id,
            )
            .await;
            if outcome == Confirmation::Skip {
                state.task_cache.mark_cancelled(task.task_id).await?;
                continue;
            }
        }

        info!(task_id = %task.task_id, name = %task.name, trigger = ?task.trigger, "running scheduled task");
        let tx = state.ws_tx.read().await.clone();
        let result = executor::run_task(task.task_id, task.script_type, &task.script_body, tx).await;
        report_result(state, &result).await;

        if matches!(task.trigger, Trigger::Now) {
            // `now` triggers are never cached (dispatched as an immediate
            // `run_task`, not `schedule_task`), but guard anyway.
            state.task_cache.remove(task.task_id).await?;
        } else if matches!(task.trigger, Trigger::Once { .. }) {
            state.task_cache.remove(task.task_id).await?;
        } else {
            state.task_cache.mark_ran(task.task_id).await?;
        }
    }
    Ok(())
}

async fn report_result(state: &AgentState, result: &TaskResultPayload) {
    state
        .try_send(WsMessage::TaskResult {
            data: result.clone(),
        })
        .await;
    state
        .try_send(WsMessage::TaskOutput {
            task_id: result.task_id,
            output: String::new(),
            progress: 100,
        })
        .await;
}

/// Watches for a local-network change, invalidates the cached reachability
/// choice, and runs `event`-triggered tasks.
pub async fn run_event_watcher(state: Arc<AgentState>) -> ! {
    let mut last_fingerprint = crate::reachability::local_ip_address().await;
    loop {
        tokio::time::sleep(EVENT_WATCHER_TICK).await;
        let current = crate::reachability::local_ip_address().await;
        let network_changed = current != last_fingerprint;

        if network_changed {
            info!(ip = ?current, "network change detected");
            last_fingerprint = current;
            state.reachability.invalidate().await;
        }

        let tasks = state.task_cache.load_all().await;
        for task in tasks.iter().filter(|t| !t.cancelled) {
            if let Trigger::Event { event_kind } = task.trigger {
                if event_kind == EventKind::NetworkChange && network_changed {
                    info!(task_id = %task.task_id, "running event-triggered task");
                    let tx = state.ws_tx.read().await.clone();
                    let result =
                        executor::run_task(task.task_id, task.script_type, &task.script_body, tx)
                            .await;
                    report_result(&state, &result).await;
                    let _ = state.task_cache.mark_ran(task.task_id).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmm_protocol::{CachedTask, ScriptType};
    use uuid::Uuid;

    #[tokio::test]
    async fn evaluate_and_run_executes_a_now_task_and_removes_it() {
        let config = Arc::new(crate::config::AgentConfig {
            server_ip_local: "127.0.0.1".into(),
            server_ip_vpn: "127.0.0.1".into(),
            server_port: 65500,
            agent_token: "t".into(),
            data_dir: std::env::temp_dir().join(format!("rmm-sched-test-{}", Uuid::new_v4())),
        });
        tokio::fs::create_dir_all(&config.data_dir).await.unwrap();
        let state = Arc::new(AgentState::new(config.clone()).await);

        let task_id = Uuid::new_v4();
        state
            .task_cache
            .upsert(CachedTask {
                task_id,
                name: "noop".into(),
                script_type: ScriptType::Shell,
                script_body: "true".into(),
                trigger: Trigger::Now,
                cancelled: false,
                last_run: None,
            })
            .await
            .unwrap();

        evaluate_and_run_once(&state).await.unwrap();
        assert!(state.task_cache.load_all().await.is_empty());
        let _ = tokio::fs::remove_dir_all(&config.data_dir).await;
    }
}
