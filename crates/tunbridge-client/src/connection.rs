//! Lazily established, single connection to the worker.
//!
//! At most one bind attempt is in flight at a time; concurrent callers share
//! its outcome through a `watch` channel. The slot lock is only held to read
//! or install state, never across the bind itself. When the worker dies the
//! live handle is cleared and the next [`ConnectionManager::acquire`] binds
//! again. There is no automatic reconnect.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::bind_flow::{BindFlow, ConnectionEvent, ProcessLink};
use crate::error::BridgeError;

/// Default upper bound for a bind attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

type Outcome<T> = Option<Result<Arc<T>, BridgeError>>;

struct ConnectionSlot<T> {
    /// Bumped on release so stale attempts cannot install themselves.
    generation: u64,
    attempt: Option<watch::Receiver<Outcome<T>>>,
    live: Option<Arc<T>>,
    /// Attempt task; after connecting it watches for the link's death.
    task: Option<AbortHandle>,
}

struct Inner<T> {
    link: Arc<dyn ProcessLink>,
    connect_timeout: Duration,
    slot: Mutex<ConnectionSlot<T>>,
    state_tx: watch::Sender<ConnectionState>,
    attempts: AtomicU64,
}

/// Owner of the connection slot. Clones share the same slot.
pub struct ConnectionManager<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Any + Send + Sync> ConnectionManager<T> {
    pub fn new(link: Arc<dyn ProcessLink>) -> Self {
        Self::with_timeout(link, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeout(link: Arc<dyn ProcessLink>, connect_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                link,
                connect_timeout,
                slot: Mutex::new(ConnectionSlot {
                    generation: 0,
                    attempt: None,
                    live: None,
                    task: None,
                }),
                state_tx,
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// The live handle, connecting first if needed.
    ///
    /// Callers arriving while an attempt is in flight wait for that same
    /// attempt and get the same result.
    pub async fn acquire(&self) -> Result<Arc<T>, BridgeError> {
        let mut outcome = {
            let mut slot = self.inner.slot.lock().await;
            if let Some(live) = &slot.live {
                return Ok(Arc::clone(live));
            }
            match &slot.attempt {
                Some(attempt) => attempt.clone(),
                None => self.begin_attempt(&mut slot),
            }
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| {
            Err(BridgeError::ConnectFailed(
                "connection released while connecting".into(),
            ))
        })
    }

    /// Run `f` against the live handle.
    ///
    /// Failures of `f` are returned as errors; the connection stays up.
    pub async fn with_connection<R, E, F, Fut>(&self, f: F) -> Result<R, BridgeError>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Into<BridgeError>,
    {
        let handle = self.acquire().await?;
        f(handle).await.map_err(|e| {
            let err = e.into();
            debug!(error = %err, "Worker call failed");
            err
        })
    }

    /// Drop the live handle and any attempt in flight. Safe to repeat.
    pub async fn release(&self) {
        let mut slot = self.inner.slot.lock().await;
        slot.generation += 1;
        let had_connection = slot.live.take().is_some();
        let had_attempt = slot.attempt.take().is_some();
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        drop(slot);

        if had_connection || had_attempt {
            info!(had_connection, had_attempt, "Released worker connection");
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state_tx.borrow() == ConnectionState::Connected
    }

    /// Number of bind attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    fn begin_attempt(&self, slot: &mut ConnectionSlot<T>) -> watch::Receiver<Outcome<T>> {
        let (tx, rx) = watch::channel(None);
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(attempt, generation = slot.generation, "Starting worker bind");

        self.inner.set_state(ConnectionState::Connecting);
        let task = tokio::spawn(Arc::clone(&self.inner).run_attempt(slot.generation, tx));
        slot.attempt = Some(rx.clone());
        slot.task = Some(task.abort_handle());
        rx
    }
}

impl<T: Any + Send + Sync> Inner<T> {
    async fn run_attempt(self: Arc<Self>, generation: u64, tx: watch::Sender<Outcome<T>>) {
        let mut flow = BindFlow::<T>::open(self.link.as_ref());

        let outcome = match tokio::time::timeout(self.connect_timeout, flow.next()).await {
            Ok(Some(ConnectionEvent::Connected(handle))) => Ok(handle),
            Ok(Some(ConnectionEvent::Disconnected(reason))) => Err(reason.into_error()),
            Ok(None) => Err(BridgeError::ConnectFailed(
                "link closed before connecting".into(),
            )),
            Err(_) => {
                warn!(timeout = ?self.connect_timeout, "Worker bind timed out");
                Err(BridgeError::ConnectTimeout(self.connect_timeout))
            }
        };
        let handle = match outcome {
            Ok(handle) => handle,
            Err(err) => {
                // Waiters may bind again as soon as they see the error.
                flow.cancel();
                self.fail(generation, &tx, err).await;
                return;
            }
        };

        {
            let mut slot = self.slot.lock().await;
            if slot.generation != generation {
                debug!("Connection released during bind, discarding");
                return;
            }
            slot.live = Some(Arc::clone(&handle));
            slot.attempt = None;
            self.set_state(ConnectionState::Connected);
            tx.send_replace(Some(Ok(handle)));
        }
        info!(generation, "Worker connection established");

        // Keep the flow alive until the link goes away.
        while let Some(event) = flow.next().await {
            if let ConnectionEvent::Disconnected(reason) = event {
                warn!(?reason, "Worker connection lost");
                break;
            }
        }

        let mut slot = self.slot.lock().await;
        if slot.generation == generation {
            slot.live = None;
            slot.task = None;
            drop(slot);
            self.set_state(ConnectionState::Disconnected);
        }
    }

    async fn fail(&self, generation: u64, tx: &watch::Sender<Outcome<T>>, err: BridgeError) {
        let mut slot = self.slot.lock().await;
        if slot.generation == generation {
            slot.attempt = None;
            slot.task = None;
            self.set_state(ConnectionState::Disconnected);
        }
        drop(slot);
        warn!(error = %err, "Worker bind failed");
        tx.send_replace(Some(Err(err)));
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}
