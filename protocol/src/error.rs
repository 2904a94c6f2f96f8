use thiserror::Error;

/// Errors produced while parsing or validating wire types.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown platform tag: {0}")]
    UnknownPlatform(String),

    #[error("unknown script type: {0}")]
    UnknownScriptType(String),

    #[error("malformed cron expression: {0}")]
    MalformedCron(String),

    #[error("invalid trigger parameters for trigger type {0}")]
    InvalidTrigger(&'static str),
}
