//! HTTP check-in and the self-update notice hook.
//!
//! The agent-binary builder that would produce a real update package is an
//! external collaborator, so `note_update_if_available` only logs — it
//! never downloads or launches anything.

use std::time::Duration;

use rmm_protocol::{CheckinRequest, CheckinResponse, DeviceId, Platform};
use tracing::{info, warn};

use crate::config::AGENT_VERSION;
use crate::error::AgentError;
use crate::heartbeat;

/// HTTP timeout for check-in.
const CHECKIN_TIMEOUT: Duration = Duration::from_secs(15);
/// Delay between retries while the server is unreachable.
pub const CHECKIN_RETRY_DELAY: Duration = Duration::from_secs(30);

pub fn detect_platform() -> Platform {
    match std::env::consts::OS {
        "windows" => Platform::Windows,
        "android" => Platform::Android,
        _ => Platform::Linux,
    }
}

/// Performs one check-in attempt against `POST /api/agent/checkin`.
pub async fn checkin(
    client: &reqwest::Client,
    server_ip: &str,
    port: u16,
    token: &str,
    device_id: DeviceId,
) -> Result<CheckinResponse, AgentError> {
    let telemetry = heartbeat::collect(crate::reachability::local_ip_address().await).await;
    let hostname = hostname_or_unknown();

    let request = CheckinRequest {
        device_id,
        agent_version: AGENT_VERSION.to_string(),
        platform: detect_platform(),
        hostname,
        ip_address: telemetry.ip_address.clone(),
        os_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        battery_level: telemetry.battery_level,
        battery_charging: telemetry.battery_charging,
        cpu_percent: telemetry.cpu_percent,
        ram_percent: telemetry.ram_percent,
        disk_percent: telemetry.disk_percent,
    };

    let url = format!("http://{server_ip}:{port}/api/agent/checkin");
    let response = tokio::time::timeout(
        CHECKIN_TIMEOUT,
        client
            .post(&url)
            .header("X-Agent-Token", token)
            .json(&request)
            .send(),
    )
    .await
    .map_err(|_| AgentError::CheckinFailed("timed out".into()))??;

    if !response.status().is_success() {
        return Err(AgentError::CheckinFailed(format!(
            "server returned {}",
            response.status()
        )));
    }

    let parsed: CheckinResponse = response.json().await?;
    note_update_if_available(&parsed);
    Ok(parsed)
}

fn hostname_or_unknown() -> String {
    hostname_impl().unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
fn hostname_impl() -> Option<String> {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
}

#[cfg(not(unix))]
fn hostname_impl() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

/// Logs update availability but never downloads/installs — the
/// agent-binary builder owns that.
fn note_update_if_available(response: &CheckinResponse) {
    if let Some(version) = &response.update_available {
        let auto = response.auto_update.unwrap_or(false);
        info!(update_available = %version, auto_update = auto, "update available: v{version}, auto_update={auto}");
    }
}

/// Retries check-in every [`CHECKIN_RETRY_DELAY`] until it succeeds.
pub async fn checkin_until_success(
    client: &reqwest::Client,
    server_ip: &str,
    port: u16,
    token: &str,
    device_id: DeviceId,
) -> CheckinResponse {
    loop {
        match checkin(client, server_ip, port, token, device_id).await {
            Ok(resp) => return resp,
            Err(e) => {
                warn!(error = %e, "checkin failed, retrying in {:?}", CHECKIN_RETRY_DELAY);
                tokio::time::sleep(CHECKIN_RETRY_DELAY).await;
            }
        }
    }
}
