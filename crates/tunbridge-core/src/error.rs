//! Error types for `tunbridge` core library.

use thiserror::Error;

/// Result type alias using `tunbridge` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `tunbridge` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Wire protocol error (malformed or unexpected frame)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
