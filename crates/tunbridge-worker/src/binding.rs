//! Resolution of the worker implementation for a requested mode.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use tunbridge_core::{TunnelOptions, WorkerMode};

use crate::capability::TrafficSource;
use crate::error::WorkerError;
use crate::notification::NotificationCell;
use crate::runner::{ModuleRunner, NotificationModule, Runner};

/// The resident implementation, tagged with the mode it was bound for.
pub enum BoundImplementation {
    Plain(Box<dyn Runner>),
    Tunneling {
        runner: Box<dyn Runner>,
        options: TunnelOptions,
    },
}

impl BoundImplementation {
    pub const fn mode(&self) -> WorkerMode {
        match self {
            Self::Plain(_) => WorkerMode::Plain,
            Self::Tunneling { .. } => WorkerMode::Tunneling,
        }
    }

    fn runner(&self) -> &dyn Runner {
        match self {
            Self::Plain(runner) | Self::Tunneling { runner, .. } => runner.as_ref(),
        }
    }

    /// Options the tunneling implementation was last started with.
    pub const fn options(&self) -> Option<&TunnelOptions> {
        match self {
            Self::Plain(_) => None,
            Self::Tunneling { options, .. } => Some(options),
        }
    }

    /// Record newer options without rebinding.
    pub fn refresh(&mut self, latest: &TunnelOptions) {
        if let Self::Tunneling { options, .. } = self {
            options.clone_from(latest);
        }
    }

    pub fn start(&self) -> Result<(), WorkerError> {
        self.runner().start()
    }

    pub fn stop(&self) {
        self.runner().stop();
    }
}

impl std::fmt::Debug for BoundImplementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundImplementation")
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

/// Produces the implementation matching a mode.
pub trait ImplementationBinder: Send + Sync + 'static {
    fn bind(
        &self,
        mode: WorkerMode,
        options: &TunnelOptions,
    ) -> impl Future<Output = Result<BoundImplementation, WorkerError>> + Send;
}

/// Binder building in-process [`ModuleRunner`]s.
pub struct LocalBinder {
    notifications: NotificationCell,
    traffic: Arc<dyn TrafficSource>,
    status_interval: Duration,
}

impl LocalBinder {
    pub fn new(
        notifications: NotificationCell,
        traffic: Arc<dyn TrafficSource>,
        status_interval: Duration,
    ) -> Self {
        Self {
            notifications,
            traffic,
            status_interval,
        }
    }

    fn runner(&self, mode: WorkerMode) -> Box<dyn Runner> {
        let notification = NotificationModule::new(
            self.notifications.clone(),
            Arc::clone(&self.traffic),
            self.status_interval,
        );
        Box::new(ModuleRunner::new(mode, vec![Box::new(notification)]))
    }
}

impl ImplementationBinder for LocalBinder {
    async fn bind(
        &self,
        mode: WorkerMode,
        options: &TunnelOptions,
    ) -> Result<BoundImplementation, WorkerError> {
        info!(%mode, "Binding implementation");
        let runner = self.runner(mode);
        Ok(match mode {
            WorkerMode::Plain => BoundImplementation::Plain(runner),
            WorkerMode::Tunneling => BoundImplementation::Tunneling {
                runner,
                options: options.clone(),
            },
        })
    }
}
