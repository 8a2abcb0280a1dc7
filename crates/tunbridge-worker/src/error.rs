//! Worker error types.

/// Errors raised while handling a foreground call.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to bind {mode} implementation: {reason}")]
    BindFailed {
        mode: tunbridge_core::WorkerMode,
        reason: String,
    },

    #[error("Failed to start implementation: {0}")]
    StartFailed(String),

    #[error(transparent)]
    Protocol(#[from] tunbridge_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
