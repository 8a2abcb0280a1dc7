//! Typed proxy for the worker's RPC surface.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, warn};

use tunbridge_core::protocol::{Call, Reply, Request, WorkerFrame, encode_line};
use tunbridge_core::{NotificationParams, Traffic, TunnelOptions};

use crate::error::BridgeError;

/// Operations the foreground can call on the worker.
pub trait WorkerRpc: Send + Sync + 'static {
    /// Opaque request handled by the worker's core; returns its opaque reply.
    fn invoke(&self, payload: String) -> impl Future<Output = Result<String, BridgeError>> + Send;

    fn start(
        &self,
        options: TunnelOptions,
        from_foreground_app: bool,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    fn stop(&self) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Route messages pushed by the worker into `sink`.
    fn set_message_callback(
        &self,
        sink: mpsc::Sender<String>,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    fn update_notification_params(
        &self,
        params: NotificationParams,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Cumulative traffic totals.
    fn traffic(&self, only_proxy: bool) -> impl Future<Output = Result<Traffic, BridgeError>> + Send;
}

type Pending = oneshot::Sender<Result<Value, String>>;

/// [`WorkerRpc`] over NDJSON lines.
///
/// Requests go out through `frame_tx`; the link's reader task feeds every
/// worker frame back through [`dispatch_frame`](Self::dispatch_frame).
#[derive(Debug)]
pub struct RemoteWorker {
    frame_tx: mpsc::Sender<String>,
    /// Response waiters keyed by request id.
    pending: RwLock<HashMap<u64, Pending>>,
    next_id: AtomicU64,
    messages: RwLock<Option<mpsc::Sender<String>>>,
    call_timeout: Duration,
    closed: AtomicBool,
}

impl RemoteWorker {
    pub fn new(frame_tx: mpsc::Sender<String>, call_timeout: Duration) -> Self {
        Self {
            frame_tx,
            pending: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            messages: RwLock::new(None),
            call_timeout,
            closed: AtomicBool::new(false),
        }
    }

    async fn call(&self, call: Call) -> Result<Value, BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::LinkLost);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = call.name();
        let line = encode_line(&Request { id, call })?;

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);
        // The link may have died between the check above and the insert.
        if self.is_closed() {
            self.pending.write().await.remove(&id);
            return Err(BridgeError::LinkLost);
        }

        debug!(id, method, "Calling worker");
        if self.frame_tx.send(line).await.is_err() {
            self.pending.write().await.remove(&id);
            return Err(BridgeError::LinkLost);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(BridgeError::RemoteCallFailed(message)),
            Ok(Err(_)) => Err(BridgeError::LinkLost),
            Err(_) => {
                self.pending.write().await.remove(&id);
                warn!(id, method, "Worker call timed out");
                Err(BridgeError::RemoteCallFailed(format!(
                    "{method} timed out after {:?}",
                    self.call_timeout
                )))
            }
        }
    }

    /// Route one frame read from the worker.
    pub async fn dispatch_frame(&self, frame: WorkerFrame) {
        match Reply::from_frame(frame) {
            Ok(reply) => {
                let waiter = self.pending.write().await.remove(&reply.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(reply.outcome);
                    }
                    None => warn!(id = reply.id, "Response for unknown request"),
                }
            }
            Err(WorkerFrame::Message { payload }) => {
                let sink = self.messages.read().await.clone();
                match sink {
                    Some(sink) => {
                        if sink.try_send(payload).is_err() {
                            warn!("Message sink full or closed, dropping worker message");
                        }
                    }
                    None => debug!("No message sink, dropping worker message"),
                }
            }
            Err(other) => debug!(frame = ?other, "Ignoring worker frame"),
        }
    }

    /// Refuse new calls with [`BridgeError::LinkLost`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Fail every waiting call with [`BridgeError::LinkLost`] and refuse new ones.
    pub async fn fail_all_pending(&self) {
        self.close();
        let drained = std::mem::take(&mut *self.pending.write().await);
        if !drained.is_empty() {
            warn!(count = drained.len(), "Failing calls in flight on lost worker link");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

impl WorkerRpc for RemoteWorker {
    async fn invoke(&self, payload: String) -> Result<String, BridgeError> {
        match self.call(Call::Invoke { payload }).await? {
            Value::String(result) => Ok(result),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }

    async fn start(
        &self,
        options: TunnelOptions,
        from_foreground_app: bool,
    ) -> Result<(), BridgeError> {
        self.call(Call::Start {
            options,
            from_foreground_app,
        })
        .await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        self.call(Call::Stop).await?;
        Ok(())
    }

    async fn set_message_callback(&self, sink: mpsc::Sender<String>) -> Result<(), BridgeError> {
        *self.messages.write().await = Some(sink);
        self.call(Call::SetMessageCallback).await?;
        Ok(())
    }

    async fn update_notification_params(
        &self,
        params: NotificationParams,
    ) -> Result<(), BridgeError> {
        self.call(Call::UpdateNotificationParams { params }).await?;
        Ok(())
    }

    async fn traffic(&self, only_proxy: bool) -> Result<Traffic, BridgeError> {
        let value = self.call(Call::QueryTraffic { only_proxy }).await?;
        serde_json::from_value(value)
            .map_err(|e| BridgeError::RemoteCallFailed(format!("Invalid traffic reply: {e}")))
    }
}
