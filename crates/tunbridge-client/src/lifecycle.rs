//! Run-state machine for the tunnel.
//!
//! `Stopped -> Pending -> Running -> Pending -> Stopped`. `Pending` is only
//! left by the transition that entered it; toggles arriving meanwhile are
//! dropped. Consent is settled while still `Stopped`, with at most one start
//! asking at a time. State and start timestamp live under one lock, which is
//! never held across a call into the connection manager or the UI.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use tunbridge_core::{NotificationParams, RunState, Traffic, TunnelOptions};

use crate::collaborator::{ConsentScope, UiCollaborator};
use crate::connection::ConnectionManager;
use crate::error::BridgeError;
use crate::rpc::WorkerRpc;

#[derive(Debug, Default)]
struct RunRecord {
    state: RunState,
    /// Set exactly while `Running`.
    started_at: Option<SystemTime>,
}

struct Inner<W, U> {
    connection: ConnectionManager<W>,
    ui: Arc<U>,
    record: Mutex<RunRecord>,
    /// A start is settling consent and has not reached `Pending` yet.
    starting: AtomicBool,
    state_tx: watch::Sender<RunState>,
}

/// Clears [`Inner::starting`] however the start ends.
struct StartClaim<'a>(&'a AtomicBool);

impl Drop for StartClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Coordinates start/stop intents with consent and the worker connection.
pub struct Lifecycle<W, U> {
    inner: Arc<Inner<W, U>>,
}

impl<W, U> Clone for Lifecycle<W, U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: WorkerRpc, U: UiCollaborator> Lifecycle<W, U> {
    pub fn new(connection: ConnectionManager<W>, ui: Arc<U>) -> Self {
        let (state_tx, _) = watch::channel(RunState::Stopped);
        Self {
            inner: Arc::new(Inner {
                connection,
                ui,
                record: Mutex::new(RunRecord::default()),
                starting: AtomicBool::new(false),
                state_tx,
            }),
        }
    }

    /// Start when stopped, stop when running, ignore while pending.
    pub async fn toggle(&self) -> Result<(), BridgeError> {
        let state = self.inner.record.lock().await.state;
        match state {
            RunState::Pending => {
                debug!("Transition in flight, ignoring toggle");
                Ok(())
            }
            RunState::Running => {
                self.stop().await;
                Ok(())
            }
            RunState::Stopped => self.start().await,
        }
    }

    /// Bring the tunnel up.
    ///
    /// No-op unless stopped and no other start is settling consent. A denied
    /// consent never leaves `Stopped`; any later failure reverts to it.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let claim = {
            let record = self.inner.record.lock().await;
            if record.state != RunState::Stopped || self.inner.starting.swap(true, Ordering::SeqCst)
            {
                debug!(state = %record.state, "Start ignored");
                return Ok(());
            }
            StartClaim(&self.inner.starting)
        };

        let options = match self.settle_consent().await {
            Ok(options) => options,
            Err(e) => {
                info!(error = %e, "Start abandoned, staying stopped");
                return Err(e);
            }
        };

        {
            let mut record = self.inner.record.lock().await;
            self.enter(&mut record, RunState::Pending);
        }
        drop(claim);

        let result = self.launch(options).await;

        let mut record = self.inner.record.lock().await;
        match &result {
            Ok(()) => {
                record.started_at = Some(SystemTime::now());
                self.enter(&mut record, RunState::Running);
                info!("Tunnel running");
            }
            Err(e) => {
                record.started_at = None;
                self.enter(&mut record, RunState::Stopped);
                if *e == BridgeError::OptionsUnavailable {
                    info!(error = %e, "Start abandoned");
                } else {
                    warn!(error = %e, "Start failed");
                }
            }
        }
        result
    }

    /// Ask for the consents a start needs and return the options it will use.
    async fn settle_consent(&self) -> Result<Option<TunnelOptions>, BridgeError> {
        let ui = &self.inner.ui;
        if !ui.request_consent(ConsentScope::Notifications).await {
            return Err(BridgeError::ConsentDenied);
        }
        let options = ui.tunnel_options().await;
        let tunneling = options.as_ref().is_some_and(|o| o.enable);
        if tunneling && !ui.request_consent(ConsentScope::Tunnel).await {
            return Err(BridgeError::ConsentDenied);
        }
        Ok(options)
    }

    async fn launch(&self, options: Option<TunnelOptions>) -> Result<(), BridgeError> {
        let options = options.ok_or(BridgeError::OptionsUnavailable)?;

        info!(mode = %options.mode(), "Starting worker");
        self.inner
            .connection
            .with_connection(|worker| async move { worker.start(options, true).await })
            .await
    }

    /// Bring the tunnel down. Best effort: once accepted the state always
    /// ends `Stopped`, even when the worker call fails.
    pub async fn stop(&self) {
        {
            let mut record = self.inner.record.lock().await;
            if record.state != RunState::Running {
                debug!(state = %record.state, "Stop ignored");
                return;
            }
            self.enter(&mut record, RunState::Pending);
        }

        if let Err(e) = self
            .inner
            .connection
            .with_connection(|worker| async move { worker.stop().await })
            .await
        {
            warn!(error = %e, "Worker stop failed, marking stopped anyway");
        }

        let mut record = self.inner.record.lock().await;
        record.started_at = None;
        self.enter(&mut record, RunState::Stopped);
        info!("Tunnel stopped");
    }

    /// Stop if running and release the worker connection.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.inner.connection.release().await;
    }

    pub async fn invoke(&self, payload: String) -> Result<String, BridgeError> {
        self.inner
            .connection
            .with_connection(|worker| async move { worker.invoke(payload).await })
            .await
    }

    pub async fn traffic(&self, only_proxy: bool) -> Result<Traffic, BridgeError> {
        self.inner
            .connection
            .with_connection(|worker| async move { worker.traffic(only_proxy).await })
            .await
    }

    pub async fn update_notification_params(
        &self,
        params: NotificationParams,
    ) -> Result<(), BridgeError> {
        self.inner
            .connection
            .with_connection(|worker| async move { worker.update_notification_params(params).await })
            .await
    }

    /// Have the worker push its messages to [`UiCollaborator::message`].
    pub async fn attach_message_channel(&self) -> Result<(), BridgeError> {
        let (tx, mut rx) = mpsc::channel::<String>(64);
        self.inner
            .connection
            .with_connection(|worker| async move { worker.set_message_callback(tx).await })
            .await?;

        let ui = Arc::clone(&self.inner.ui);
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                ui.message(payload);
            }
            debug!("Worker message channel closed");
        });
        Ok(())
    }

    /// Seconds since the tunnel entered `Running`, or 0.
    pub async fn runtime_seconds(&self) -> u64 {
        self.started_at().await.map_or(0, |started| {
            SystemTime::now()
                .duration_since(started)
                .map_or(0, |elapsed| elapsed.as_secs())
        })
    }

    pub async fn started_at(&self) -> Option<SystemTime> {
        self.inner.record.lock().await.started_at
    }

    pub fn state(&self) -> RunState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.inner.state_tx.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager<W> {
        &self.inner.connection
    }

    fn enter(&self, record: &mut RunRecord, state: RunState) {
        debug!(from = %record.state, to = %state, "Run state transition");
        record.state = state;
        self.inner.state_tx.send_replace(state);
    }
}
