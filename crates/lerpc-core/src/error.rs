//! Error types for lerpc.
//!
//! Transport, protocol, capacity and retry failures surface as [`LerpcError`].
//! Dispatch failures (unknown handler, failed auth) are not errors at this
//! level: the executor turns them into `RpcResult` values with `code=Error`
//! so the remote caller always receives a well-formed reply.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for lerpc.
#[derive(Debug, Error)]
pub enum LerpcError {
    // Transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Connection slot {slot} is not connected")]
    NotConnected { slot: usize },

    #[error("Reply channel dropped for {id}")]
    ReplyDropped { id: String },

    // Protocol errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Capacity errors
    #[error("Executor queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    // Execution errors
    #[error("Promise failed: {message}")]
    PromiseFailed { message: String },

    #[error("Request failed: {message}")]
    Remote { message: String },

    #[error("Too many attempts ({attempts})")]
    TooManyAttempts { attempts: u32 },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for lerpc operations.
pub type Result<T> = std::result::Result<T, LerpcError>;

impl From<std::io::Error> for LerpcError {
    fn from(err: std::io::Error) -> Self {
        LerpcError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LerpcError {
    fn from(err: serde_json::Error) -> Self {
        LerpcError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for LerpcError {
    fn from(err: reqwest::Error) -> Self {
        LerpcError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LerpcError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LerpcError::WebSocket {
            message: err.to_string(),
        }
    }
}

impl LerpcError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        LerpcError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Map a reqwest failure, reporting timeouts against `timeout`.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            LerpcError::Timeout(timeout)
        } else {
            err.into()
        }
    }

    /// Check if this error should trigger a retry on another attempt.
    ///
    /// Transport faults and queue rejections are retryable; malformed
    /// payloads and exhausted budgets are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LerpcError::Network { .. }
                | LerpcError::WebSocket { .. }
                | LerpcError::Timeout(_)
                | LerpcError::NotConnected { .. }
                | LerpcError::ReplyDropped { .. }
                | LerpcError::QueueFull { .. }
        )
    }
}
