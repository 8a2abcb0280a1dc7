//! The worker's core capability: opaque actions and traffic counters.
//!
//! The tunneling engine itself lives behind this seam. [`LoopbackCapability`]
//! is the stand-in used when no engine is linked: it echoes actions and
//! counts the bytes it has seen.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use tunbridge_core::Traffic;

use crate::error::WorkerError;

/// Cumulative traffic counters.
pub trait TrafficSource: Send + Sync {
    /// Totals since the worker started. `only_proxy` restricts the count to
    /// proxied connections when the engine distinguishes them.
    fn traffic(&self, only_proxy: bool) -> Traffic;
}

/// Opaque action handler exposed through `invoke`.
pub trait Capability: TrafficSource + 'static {
    fn invoke(&self, payload: String)
    -> impl Future<Output = Result<String, WorkerError>> + Send;
}

/// Echoing capability with byte accounting.
pub struct LoopbackCapability {
    up: AtomicU64,
    down: AtomicU64,
    messages: Option<mpsc::Sender<String>>,
}

impl LoopbackCapability {
    pub const fn new() -> Self {
        Self {
            up: AtomicU64::new(0),
            down: AtomicU64::new(0),
            messages: None,
        }
    }

    /// Also push every handled payload to the foreground message channel.
    #[must_use]
    pub fn with_messages(mut self, messages: mpsc::Sender<String>) -> Self {
        self.messages = Some(messages);
        self
    }
}

impl Default for LoopbackCapability {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficSource for LoopbackCapability {
    fn traffic(&self, _only_proxy: bool) -> Traffic {
        Traffic::new(self.up.load(Ordering::Relaxed), self.down.load(Ordering::Relaxed))
    }
}

impl Capability for LoopbackCapability {
    async fn invoke(&self, payload: String) -> Result<String, WorkerError> {
        let len = payload.len() as u64;
        self.up.fetch_add(len, Ordering::Relaxed);
        self.down.fetch_add(len, Ordering::Relaxed);
        debug!(bytes = len, "Loopback invoke");

        if let Some(tx) = &self.messages {
            // Pushes are best-effort; a full channel drops the message.
            let _ = tx.try_send(payload.clone());
        }
        Ok(payload)
    }
}
