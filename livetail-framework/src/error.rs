use thiserror::Error;

/// a single inbound message failed normalization
///
/// Recovered locally: the supervisor drops the message and keeps the
/// stream alive. Never user-visible beyond a debug log.
#[derive(Debug, Error)]
pub enum MalformedEvent {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid timestamp {0:?}: {1}")]
    Timestamp(String, chrono::format::ParseError),

    #[error("unknown level {0:?}")]
    UnknownLevel(String),
}
