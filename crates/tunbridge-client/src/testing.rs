//! In-process fakes for the worker, its link and the UI.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};

use tunbridge_core::{NotificationParams, Traffic, TunnelOptions};

use crate::bind_flow::{Binding, LinkEvents, ProcessLink, RawBinder};
use crate::collaborator::{ConsentScope, UiCollaborator};
use crate::error::BridgeError;
use crate::rpc::WorkerRpc;

/// Worker that records calls and echoes invokes.
#[derive(Default)]
pub struct FakeWorker {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_start: bool,
    pub fail_stop: bool,
    /// When set, `start` waits for [`open_gate`](Self::open_gate).
    pub gate: Option<Notify>,
    bytes: AtomicU64,
    sink: Mutex<Option<mpsc::Sender<String>>>,
}

impl FakeWorker {
    pub fn gated() -> Self {
        Self {
            gate: Some(Notify::new()),
            ..Self::default()
        }
    }

    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn failing_stop() -> Self {
        Self {
            fail_stop: true,
            ..Self::default()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn message_sink(&self) -> Option<mpsc::Sender<String>> {
        self.sink.lock().unwrap().clone()
    }
}

impl WorkerRpc for FakeWorker {
    async fn invoke(&self, payload: String) -> Result<String, BridgeError> {
        self.bytes.fetch_add(payload.len() as u64, Ordering::SeqCst);
        Ok(payload)
    }

    async fn start(
        &self,
        _options: TunnelOptions,
        _from_foreground_app: bool,
    ) -> Result<(), BridgeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_start {
            return Err(BridgeError::RemoteCallFailed("start refused".into()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), BridgeError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(BridgeError::RemoteCallFailed("stop refused".into()));
        }
        Ok(())
    }

    async fn set_message_callback(&self, sink: mpsc::Sender<String>) -> Result<(), BridgeError> {
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn update_notification_params(
        &self,
        _params: NotificationParams,
    ) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn traffic(&self, _only_proxy: bool) -> Result<Traffic, BridgeError> {
        let bytes = self.bytes.load(Ordering::SeqCst);
        Ok(Traffic::new(bytes, bytes))
    }
}

/// Link that hands over the same worker as soon as it is asked to bind.
pub struct InstantLink {
    worker: Arc<FakeWorker>,
    binds: AtomicUsize,
    events: Mutex<Option<LinkEvents>>,
}

impl InstantLink {
    pub const fn new(worker: Arc<FakeWorker>) -> Self {
        Self {
            worker,
            binds: AtomicUsize::new(0),
            events: Mutex::new(None),
        }
    }

    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    /// Report the death of the most recently bound worker.
    pub fn kill(&self) {
        if let Some(events) = self.events.lock().unwrap().take() {
            events.died();
        }
    }
}

struct NoopBinding;

impl Binding for NoopBinding {
    fn unbind(self: Box<Self>) {}
}

impl ProcessLink for InstantLink {
    fn bind(&self, events: LinkEvents) -> Result<Box<dyn Binding>, BridgeError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        events.connected(RawBinder::new("fake", Arc::clone(&self.worker)));
        *self.events.lock().unwrap() = Some(events);
        Ok(Box::new(NoopBinding))
    }
}

/// UI with fixed options that grants every consent not listed in `deny`.
#[derive(Default)]
pub struct FakeUi {
    pub options: Option<TunnelOptions>,
    pub deny: Vec<ConsentScope>,
    /// How long each consent prompt takes to answer.
    pub consent_delay: Option<Duration>,
    consents: Mutex<Vec<ConsentScope>>,
    messages: Mutex<Vec<String>>,
}

impl FakeUi {
    pub fn with_options(options: TunnelOptions) -> Self {
        Self {
            options: Some(options),
            ..Self::default()
        }
    }

    pub fn denying(options: TunnelOptions, scope: ConsentScope) -> Self {
        Self {
            deny: vec![scope],
            ..Self::with_options(options)
        }
    }

    pub fn slow_consent(options: TunnelOptions, delay: Duration) -> Self {
        Self {
            consent_delay: Some(delay),
            ..Self::with_options(options)
        }
    }

    pub fn consents(&self) -> Vec<ConsentScope> {
        self.consents.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl UiCollaborator for FakeUi {
    async fn tunnel_options(&self) -> Option<TunnelOptions> {
        self.options.clone()
    }

    async fn request_consent(&self, scope: ConsentScope) -> bool {
        self.consents.lock().unwrap().push(scope);
        if let Some(delay) = self.consent_delay {
            tokio::time::sleep(delay).await;
        }
        !self.deny.contains(&scope)
    }

    fn message(&self, payload: String) {
        self.messages.lock().unwrap().push(payload);
    }
}
