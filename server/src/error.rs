use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced by the dashboard/check-in HTTP API and the agent session.
///
/// Nothing in the control-plane core panics the process over these — they
/// all become HTTP status codes or a logged-and-continued session event,
/// never a crash.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(uuid::Uuid),

    #[error("invalid agent token")]
    BadAgentToken,

    #[error("protocol error: {0}")]
    Protocol(#[from] rmm_protocol::ProtocolError),

    #[error("push channel full, message dropped")]
    PushChannelFull,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match self {
            ServerError::DeviceNotFound(_) | ServerError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadAgentToken => StatusCode::UNAUTHORIZED,
            ServerError::Protocol(_) => StatusCode::BAD_REQUEST,
            ServerError::PushChannelFull => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}
