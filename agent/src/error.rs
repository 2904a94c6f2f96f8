use thiserror::Error;

/// Errors surfaced by the agent's background loops. Nothing here panics
/// the process — callers log and keep looping.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("neither server endpoint reachable")]
    NoReachableEndpoint,

    #[error("check-in failed: {0}")]
    CheckinFailed(String),
}
