//! Error types for the foreground client.

use std::time::Duration;

/// Failures surfaced by the connection layer and the run-state machine.
///
/// Values are `Clone` so one bind outcome can be handed to every caller
/// waiting on the same attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Timed out after {0:?} waiting for the worker to connect")]
    ConnectTimeout(Duration),

    #[error("Failed to connect to worker: {0}")]
    ConnectFailed(String),

    #[error("Worker call failed: {0}")]
    RemoteCallFailed(String),

    #[error("No tunnel options supplied")]
    OptionsUnavailable,

    #[error("Worker exposes unexpected interface {actual:?} (expected {expected})")]
    InvalidBinderType { expected: String, actual: String },

    #[error("Worker link lost")]
    LinkLost,

    #[error("Consent denied")]
    ConsentDenied,
}

impl From<tunbridge_core::Error> for BridgeError {
    fn from(e: tunbridge_core::Error) -> Self {
        Self::RemoteCallFailed(e.to_string())
    }
}
