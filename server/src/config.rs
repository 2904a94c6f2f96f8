use clap::Parser;

/// Server configuration, sourced from CLI flags or environment variables.
///
/// `database_url` and `redis_url` are accepted and logged but otherwise
/// unused by this crate: the relational persistence layer and the
/// push-command broker are external collaborators; the control-plane core
/// here uses an in-memory `DeviceStore` and an in-process `PushBus` (see
/// `state.rs`), both designed to be swapped for those real backends without
/// touching the session/dispatch code.
#[derive(Debug, Clone, Parser)]
#[command(name = "rmm-server", about = "Sovereign RMM control-plane server")]
pub struct ServerConfig {
    /// Connection string for the (external) relational store.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Connection string for the (external) pub/sub broker.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Shared secret agents present via `X-Agent-Token` / `?token=`.
    #[arg(long, env = "AGENT_TOKEN", default_value = "change-me")]
    pub agent_token: String,

    /// Advertised server IP, used to build the `websocket_url` returned from
    /// check-in.
    #[arg(long, env = "SERVER_IP", default_value = "127.0.0.1")]
    pub server_ip: String,

    /// Port to bind and to advertise in the check-in response.
    #[arg(long, env = "BACKEND_PORT", default_value_t = 8000)]
    pub backend_port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from(([0, 0, 0, 0], self.backend_port))
    }
}
