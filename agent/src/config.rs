use clap::Parser;

/// Agent configuration: two server addresses and the shared agent token.
/// Exposed through `clap` with `env` fallbacks, matching the server's
/// configuration style (`rmm_server::config::ServerConfig`), rather than
/// literal compile-time constants — these are still effectively
/// build-time settings, just sourced at process start instead of baked
/// into the binary, which keeps one binary deployable across sites.
#[derive(Debug, Clone, Parser)]
#[command(name = "rmm-agent", about = "Sovereign RMM agent")]
pub struct AgentConfig {
    /// Primary (LAN) server address or hostname.
    #[arg(long, env = "RMM_SERVER_IP_LOCAL", default_value = "127.0.0.1")]
    pub server_ip_local: String,

    /// Fallback (VPN) server address or hostname.
    #[arg(long, env = "RMM_SERVER_IP_VPN", default_value = "127.0.0.1")]
    pub server_ip_vpn: String,

    /// Port shared by both candidate addresses.
    #[arg(long, env = "RMM_SERVER_PORT", default_value_t = 8000)]
    pub server_port: u16,

    /// Shared secret presented as `X-Agent-Token` / `?token=`.
    #[arg(long, env = "RMM_AGENT_TOKEN", default_value = "change-me")]
    pub agent_token: String,

    /// Directory holding `state.json`, `scheduled_tasks.json`, and the log
    /// file.
    #[arg(long, env = "RMM_AGENT_DATA_DIR", default_value = ".")]
    pub data_dir: std::path::PathBuf,
}

/// Version reported in check-ins and heartbeats.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

impl AgentConfig {
    pub fn state_path(&self) -> std::path::PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn tasks_path(&self) -> std::path::PathBuf {
        self.data_dir.join("scheduled_tasks.json")
    }
}
