//! Pre-run confirmer: just-in-time check before a scheduled task fires,
//! asking the server whether the task was cancelled.
//!
//! Availability is preferred over honoring a rare late cancellation: any
//! failure to reach the server means "proceed".

use std::time::Duration;

use rmm_protocol::TaskDefinitionResponse;
use tracing::{info, warn};
use uuid::Uuid;

/// HTTP timeout for the pre-run check.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Proceed,
    Skip,
}

/// Asks the server for `task_id`'s current `cancelled` flag.
/// - reachable + `cancelled == true` → `Skip`
/// - reachable + `cancelled == false` → `Proceed`
/// - unreachable (timeout, connection error, non-200) → `Proceed`
pub async fn confirm(client: &reqwest::Client, server_ip: &str, port: u16, token: &str, task_id: Uuid) -> Confirmation {
    let url = format!("http://{server_ip}:{port}/api/dashboard/tasks/{task_id}");
    let response = tokio::time::timeout(
        CONFIRM_TIMEOUT,
        client.get(&url).header("X-Agent-Token", token).send(),
    )
    .await;

    let outcome = match response {
        Ok(Ok(resp)) if resp.status().is_success() => resp.json::<TaskDefinitionResponse>().await.ok(),
        _ => None,
    };

    match outcome {
        Some(def) if def.cancelled => {
            info!(%task_id, "task cancelled on server, skipping scheduled run");
            Confirmation::Skip
        }
        Some(_) => Confirmation::Proceed,
        None => {
            warn!(%task_id, "pre-run confirmer could not reach server, proceeding anyway");
            Confirmation::Proceed
        }
    }
}
