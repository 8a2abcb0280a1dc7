//! Worker-side dispatcher.
//!
//! Receives foreground calls one at a time and routes them to the resident
//! implementation, rebinding only when a start request asks for a different
//! mode than the one currently bound.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use tunbridge_core::protocol::{Call, Request, WorkerFrame};
use tunbridge_core::{NotificationParams, Traffic, TunnelOptions, WorkerMode};

use crate::binding::{BoundImplementation, ImplementationBinder};
use crate::capability::Capability;
use crate::error::WorkerError;
use crate::notification::NotificationCell;

/// Which implementation, if any, is resident.
#[derive(Debug, Default)]
pub enum BindingState {
    #[default]
    Unbound,
    Binding(WorkerMode),
    Bound(BoundImplementation),
}

impl BindingState {
    /// Mode of the resident implementation.
    pub const fn bound_mode(&self) -> Option<WorkerMode> {
        match self {
            Self::Bound(implementation) => Some(implementation.mode()),
            _ => None,
        }
    }
}

/// Worker-side state mutated only through the dispatcher.
#[derive(Debug, Default)]
pub struct RunContext {
    pub binding: BindingState,
    /// Options of the most recent start request.
    pub options: Option<TunnelOptions>,
    /// Whether the most recent start came from the foreground app itself.
    pub from_foreground_app: bool,
    /// Forward capability messages to the foreground.
    pub forward_messages: bool,
}

pub struct Dispatcher<B, C> {
    binder: B,
    capability: Arc<C>,
    notifications: NotificationCell,
    context: RunContext,
    binds: u64,
}

impl<B: ImplementationBinder, C: Capability> Dispatcher<B, C> {
    pub fn new(binder: B, capability: Arc<C>, notifications: NotificationCell) -> Self {
        Self {
            binder,
            capability,
            notifications,
            context: RunContext::default(),
            binds: 0,
        }
    }

    pub const fn context(&self) -> &RunContext {
        &self.context
    }

    /// Number of implementation binds performed so far.
    pub const fn bind_count(&self) -> u64 {
        self.binds
    }

    pub const fn forwards_messages(&self) -> bool {
        self.context.forward_messages
    }

    /// Handle one request and build its response frame.
    pub async fn handle(&mut self, request: Request) -> WorkerFrame {
        let id = request.id;
        let method = request.call.name();
        debug!(id, method, "Dispatching call");
        match self.dispatch(request.call).await {
            Ok(result) => WorkerFrame::ok(id, result),
            Err(e) => {
                warn!(id, method, error = %e, "Call failed");
                WorkerFrame::err(id, e.to_string())
            }
        }
    }

    async fn dispatch(&mut self, call: Call) -> Result<Value, WorkerError> {
        match call {
            Call::Invoke { payload } => Ok(Value::String(self.capability.invoke(payload).await?)),
            Call::Start {
                options,
                from_foreground_app,
            } => {
                self.start(options, from_foreground_app).await?;
                Ok(Value::Null)
            }
            Call::Stop => {
                self.stop();
                Ok(Value::Null)
            }
            Call::SetMessageCallback => {
                self.context.forward_messages = true;
                Ok(Value::Null)
            }
            Call::UpdateNotificationParams { params } => {
                self.update_notification_params(params);
                Ok(Value::Null)
            }
            Call::QueryTraffic { only_proxy } => serde_json::to_value(self.traffic(only_proxy))
                .map_err(|e| WorkerError::Protocol(e.into())),
        }
    }

    /// Start the implementation matching `options`, rebinding if the resident
    /// one was bound for another mode.
    pub async fn start(
        &mut self,
        options: TunnelOptions,
        from_foreground_app: bool,
    ) -> Result<(), WorkerError> {
        let mode = options.mode();
        self.context.from_foreground_app = from_foreground_app;

        if let BindingState::Bound(implementation) = &mut self.context.binding {
            if implementation.mode() == mode {
                implementation.refresh(&options);
                self.context.options = Some(options);
                debug!(%mode, "Implementation already bound, starting");
                return implementation.start();
            }
        }

        let previous = std::mem::replace(&mut self.context.binding, BindingState::Binding(mode));
        if let BindingState::Bound(outgoing) = previous {
            info!(from = %outgoing.mode(), to = %mode, "Switching implementation");
            outgoing.stop();
        }
        self.context.options = Some(options.clone());

        match self.binder.bind(mode, &options).await {
            Ok(implementation) => {
                self.binds += 1;
                info!(%mode, from_foreground_app, "Implementation bound");
                let started = implementation.start();
                self.context.binding = BindingState::Bound(implementation);
                started
            }
            Err(e) => {
                self.context.binding = BindingState::Unbound;
                Err(e)
            }
        }
    }

    /// Stop the resident implementation; no-op when nothing is bound.
    pub fn stop(&self) {
        match &self.context.binding {
            BindingState::Bound(implementation) => implementation.stop(),
            _ => debug!("Stop requested with no implementation bound"),
        }
    }

    pub fn update_notification_params(&self, params: NotificationParams) {
        self.notifications.publish(params);
    }

    pub fn traffic(&self, only_proxy: bool) -> Traffic {
        self.capability.traffic(only_proxy)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::capability::{LoopbackCapability, TrafficSource};
    use crate::runner::Runner;

    #[derive(Default)]
    struct Calls {
        binds: Mutex<Vec<WorkerMode>>,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    struct Recording(Arc<Calls>);

    impl Runner for Recording {
        fn start(&self) -> Result<(), WorkerError> {
            self.0.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.0.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct RecordingBinder {
        calls: Arc<Calls>,
        fail: bool,
    }

    impl ImplementationBinder for RecordingBinder {
        async fn bind(
            &self,
            mode: WorkerMode,
            options: &TunnelOptions,
        ) -> Result<BoundImplementation, WorkerError> {
            self.calls.binds.lock().unwrap().push(mode);
            if self.fail {
                return Err(WorkerError::BindFailed {
                    mode,
                    reason: "refused".into(),
                });
            }
            let runner = Box::new(Recording(Arc::clone(&self.calls)));
            Ok(match mode {
                WorkerMode::Plain => BoundImplementation::Plain(runner),
                WorkerMode::Tunneling => BoundImplementation::Tunneling {
                    runner,
                    options: options.clone(),
                },
            })
        }
    }

    fn dispatcher(fail: bool) -> (Dispatcher<RecordingBinder, LoopbackCapability>, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let binder = RecordingBinder {
            calls: Arc::clone(&calls),
            fail,
        };
        (
            Dispatcher::new(binder, Arc::new(LoopbackCapability::new()), NotificationCell::new()),
            calls,
        )
    }

    #[tokio::test]
    async fn first_start_binds_then_starts() {
        let (mut d, calls) = dispatcher(false);
        d.start(TunnelOptions::plain(), true).await.unwrap();

        assert_eq!(*calls.binds.lock().unwrap(), vec![WorkerMode::Plain]);
        assert_eq!(calls.starts.load(Ordering::SeqCst), 1);
        assert_eq!(d.context().binding.bound_mode(), Some(WorkerMode::Plain));
        assert!(d.context().from_foreground_app);
    }

    #[tokio::test]
    async fn same_mode_start_does_not_rebind() {
        let (mut d, calls) = dispatcher(false);
        d.start(TunnelOptions::plain(), true).await.unwrap();
        d.start(TunnelOptions::plain(), false).await.unwrap();

        assert_eq!(d.bind_count(), 1);
        assert_eq!(calls.starts.load(Ordering::SeqCst), 2);
        assert!(!d.context().from_foreground_app);
    }

    #[tokio::test]
    async fn mode_change_rebinds_exactly_once() {
        let (mut d, calls) = dispatcher(false);
        d.start(TunnelOptions::plain(), true).await.unwrap();
        let tunnel = TunnelOptions::tunneling(json!({"tun": "utun3"}));
        d.start(tunnel.clone(), true).await.unwrap();

        assert_eq!(
            *calls.binds.lock().unwrap(),
            vec![WorkerMode::Plain, WorkerMode::Tunneling]
        );
        assert_eq!(d.bind_count(), 2);
        // Outgoing plain implementation is stopped before the switch.
        assert_eq!(calls.stops.load(Ordering::SeqCst), 1);
        assert_eq!(d.context().options, Some(tunnel));
    }

    #[tokio::test]
    async fn stop_without_implementation_is_noop() {
        let (d, calls) = dispatcher(false);
        d.stop();
        assert_eq!(calls.stops.load(Ordering::SeqCst), 0);
        assert!(matches!(d.context().binding, BindingState::Unbound));
    }

    #[tokio::test]
    async fn stop_keeps_binding() {
        let (mut d, calls) = dispatcher(false);
        d.start(TunnelOptions::plain(), true).await.unwrap();
        d.stop();
        assert_eq!(calls.stops.load(Ordering::SeqCst), 1);
        assert_eq!(d.context().binding.bound_mode(), Some(WorkerMode::Plain));

        d.start(TunnelOptions::plain(), true).await.unwrap();
        assert_eq!(d.bind_count(), 1);
    }

    #[tokio::test]
    async fn failed_bind_leaves_unbound() {
        let (mut d, calls) = dispatcher(true);
        let err = d.start(TunnelOptions::plain(), true).await.unwrap_err();
        assert!(matches!(err, WorkerError::BindFailed { .. }));
        assert!(matches!(d.context().binding, BindingState::Unbound));
        assert_eq!(calls.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handle_maps_outcomes_to_frames() {
        let (mut d, _calls) = dispatcher(false);
        let frame = d
            .handle(Request {
                id: 1,
                call: Call::Invoke {
                    payload: "abc".into(),
                },
            })
            .await;
        assert_eq!(frame, WorkerFrame::ok(1, json!("abc")));

        let frame = d
            .handle(Request {
                id: 2,
                call: Call::QueryTraffic { only_proxy: false },
            })
            .await;
        assert_eq!(frame, WorkerFrame::ok(2, json!({"up": 3, "down": 3})));
    }

    #[tokio::test]
    async fn handle_reports_start_failure() {
        let (mut d, _calls) = dispatcher(true);
        let frame = d
            .handle(Request {
                id: 9,
                call: Call::Start {
                    options: TunnelOptions::plain(),
                    from_foreground_app: true,
                },
            })
            .await;
        let WorkerFrame::Response { id, error, .. } = frame else {
            panic!("expected response");
        };
        assert_eq!(id, 9);
        assert!(error.unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn notification_params_reach_cell() {
        let (mut d, _calls) = dispatcher(false);
        let cell = d.notifications.clone();
        let params = NotificationParams {
            title: "Running".into(),
            ..NotificationParams::default()
        };
        d.handle(Request {
            id: 3,
            call: Call::UpdateNotificationParams {
                params: params.clone(),
            },
        })
        .await;
        assert_eq!(cell.latest(), Some(params));
    }

    #[tokio::test]
    async fn message_callback_enables_forwarding() {
        let (mut d, _calls) = dispatcher(false);
        assert!(!d.forwards_messages());
        d.handle(Request {
            id: 4,
            call: Call::SetMessageCallback,
        })
        .await;
        assert!(d.forwards_messages());
    }

    #[test]
    fn loopback_is_traffic_source() {
        let cap = LoopbackCapability::new();
        assert_eq!(cap.traffic(true), Traffic::default());
    }
}
