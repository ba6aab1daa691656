//! Error types for the chat dispatch engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors that can occur while dispatching a chat or analysis request.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Connection, DNS or timeout failure talking to a backend.
    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    /// Non-success status or malformed top-level response body.
    #[error("Backend returned a bad response: {0}")]
    BackendBadResponse(String),

    /// A single streamed chunk could not be decoded.
    #[error("Failed to decode stream chunk: {0}")]
    ChunkDecode(String),

    #[error("Failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A progress chunk could not be handed to the listener.
    #[error("Progress delivery failed: {0}")]
    SinkDelivery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// Whether the error is absorbed by the component that raised it.
    ///
    /// Recoverable kinds are logged and counted but never abort an exchange.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ChunkDecode(_) | Self::FileRead { .. } | Self::SinkDelivery(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            Self::BackendUnreachable(err.to_string())
        } else {
            Self::BackendBadResponse(err.to_string())
        }
    }
}
