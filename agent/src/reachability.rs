//! Reachability selector: chooses between the primary LAN and fallback VPN
//! server addresses by TCP probe, caching the choice for a week and
//! invalidating on local-network change.
//!
//! Durable state lives in `state.json` alongside the device id, written
//! atomically the same way the Local Task Cache is (temp file + rename).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use rmm_protocol::DeviceId;

use crate::config::AgentConfig;
use crate::error::AgentError;

/// TTL before a cached endpoint choice is re-probed.
const RETEST_TTL: chrono::Duration = chrono::Duration::days(7);
/// TCP connect timeout per probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// On-disk shape of `state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedState {
    device_id: DeviceId,
    active_ip: Option<String>,
    last_probe_at: Option<DateTime<Utc>>,
    last_network: Option<String>,
}

impl PersistedState {
    fn fresh() -> Self {
        Self {
            device_id: DeviceId::new(),
            active_ip: None,
            last_probe_at: None,
            last_network: None,
        }
    }
}

async fn load(path: &Path) -> PersistedState {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(error = %e, "state.json unreadable, starting fresh");
            PersistedState::fresh()
        }),
        Err(_) => PersistedState::fresh(),
    }
}

/// Writes `state` durably via temp-file + rename on the same filesystem,
/// never truncating the file in place.
async fn save(path: &Path, state: &PersistedState) -> Result<(), AgentError> {
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    let bytes = serde_json::to_vec_pretty(state)?;
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Best-effort local-network fingerprint: the outbound-route local IP
/// address. A Wi-Fi SSID lookup would need an OS-specific tool per
/// platform, so this fingerprints on local IP alone — still enough to
/// detect "moved to a different network".
async fn network_fingerprint() -> String {
    match UdpSocket::bind("0.0.0.0:0").await {
        Ok(sock) => match sock.connect("8.8.8.8:80").await {
            Ok(()) => sock
                .local_addr()
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            Err(_) => "unknown".to_string(),
        },
        Err(_) => "unknown".to_string(),
    }
}

async fn probe(host: &str, port: u16) -> bool {
    let addr = format!("{host}:{port}");
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&addr)).await,
        Ok(Ok(_))
    )
}

/// Agent-wide reachability cache plus the device id it's stored alongside.
pub struct ReachabilitySelector {
    path: PathBuf,
    primary: String,
    fallback: String,
    port: u16,
    state: RwLock<PersistedState>,
}

impl ReachabilitySelector {
    pub async fn load(config: &AgentConfig) -> Self {
        let path = config.state_path();
        let state = load(&path).await;
        info!(device_id = %state.device_id, "agent identity loaded");
        Self {
            path,
            primary: config.server_ip_local.clone(),
            fallback: config.server_ip_vpn.clone(),
            port: config.server_port,
            state: RwLock::new(state),
        }
    }

    pub async fn device_id(&self) -> DeviceId {
        self.state.read().await.device_id
    }

    /// Returns the cache if fresh and the network hasn't changed; otherwise
    /// probes primary, then fallback, and persists whichever answers. If
    /// neither answers, returns the cached (or primary) address anyway — the
    /// caller's connect attempt will fail and retry under its own backoff.
    pub async fn select(&self) -> String {
        let fingerprint = network_fingerprint().await;
        {
            let state = self.state.read().await;
            if let (Some(ip), Some(probed_at)) = (&state.active_ip, state.last_probe_at) {
                let fresh = Utc::now() - probed_at < RETEST_TTL;
                let same_network = state.last_network.as_deref() == Some(fingerprint.as_str());
                if fresh && same_network {
                    return ip.clone();
                }
            }
        }

        info!("re-probing server endpoints");
        let chosen = if probe(&self.primary, self.port).await {
            Some(self.primary.clone())
        } else if probe(&self.fallback, self.port).await {
            Some(self.fallback.clone())
        } else {
            None
        };

        let mut state = self.state.write().await;
        match chosen {
            Some(ip) => {
                state.active_ip = Some(ip.clone());
                state.last_probe_at = Some(Utc::now());
                state.last_network = Some(fingerprint);
                let _ = save(&self.path, &state).await;
                ip
            }
            None => {
                warn!("neither primary nor fallback endpoint reachable");
                state
                    .active_ip
                    .clone()
                    .unwrap_or_else(|| self.primary.clone())
            }
        }
    }

    /// Forces a re-probe on the next `select()` call: triggered by
    /// network-change detection or a WebSocket disconnect.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.last_probe_at = None;
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Used by the agent's own local-IP reporting in check-in/heartbeat
/// payloads.
pub async fn local_ip_address() -> Option<String> {
    let sock = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    sock.connect("8.8.8.8:80").await.ok()?;
    sock.local_addr().ok().map(|a| a.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_cache_returns_none_initially() {
        let tmp = std::env::temp_dir().join(format!("rmm-test-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&tmp).await.unwrap();
        let config = AgentConfig {
            server_ip_local: "127.0.0.1".into(),
            server_ip_vpn: "127.0.0.1".into(),
            server_port: 1,
            agent_token: "t".into(),
            data_dir: tmp.clone(),
        };
        let selector = ReachabilitySelector::load(&config).await;
        assert!(selector.state.read().await.active_ip.is_none());
        let _ = tokio::fs::remove_dir_all(&tmp).await;
    }

    #[tokio::test]
    async fn invalidate_clears_probe_timestamp() {
        let tmp = std::env::temp_dir().join(format!("rmm-test-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&tmp).await.unwrap();
        let config = AgentConfig {
            server_ip_local: "127.0.0.1".into(),
            server_ip_vpn: "127.0.0.1".into(),
            server_port: 1,
            agent_token: "t".into(),
            data_dir: tmp.clone(),
        };
        let selector = ReachabilitySelector::load(&config).await;
        {
            let mut state = selector.state.write().await;
            state.active_ip = Some("10.0.0.1".into());
            state.last_probe_at = Some(Utc::now());
        }
        selector.invalidate().await;
        assert!(selector.state.read().await.last_probe_at.is_none());
        let _ = tokio::fs::remove_dir_all(&tmp).await;
    }
}
