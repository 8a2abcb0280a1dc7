//! Worker implementations and the modules they install.
//!
//! A [`Runner`] is what the dispatcher starts and stops. [`ModuleRunner`]
//! installs a fixed set of [`Module`]s on start and removes them on stop.
//! Both operations are idempotent so repeated stop requests are harmless.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use tunbridge_core::{Traffic, WorkerMode};

use crate::capability::TrafficSource;
use crate::error::WorkerError;
use crate::notification::NotificationCell;

/// A startable worker implementation.
pub trait Runner: Send + Sync {
    fn start(&self) -> Result<(), WorkerError>;
    fn stop(&self);
}

/// A unit of functionality installed while the implementation runs.
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;
    fn install(&self) -> Result<(), WorkerError>;
    /// Must be safe to call when not installed.
    fn uninstall(&self);
}

/// Runner that installs its modules in order and removes them in reverse.
pub struct ModuleRunner {
    mode: WorkerMode,
    modules: Vec<Box<dyn Module>>,
}

impl ModuleRunner {
    pub fn new(mode: WorkerMode, modules: Vec<Box<dyn Module>>) -> Self {
        Self { mode, modules }
    }
}

impl Runner for ModuleRunner {
    fn start(&self) -> Result<(), WorkerError> {
        for module in &self.modules {
            module.install()?;
            debug!(mode = %self.mode, module = module.name(), "Module installed");
        }
        info!(mode = %self.mode, modules = self.modules.len(), "Implementation started");
        Ok(())
    }

    fn stop(&self) {
        for module in self.modules.iter().rev() {
            module.uninstall();
        }
        info!(mode = %self.mode, "Implementation stopped");
    }
}

/// Periodically renders the status line from the latest notification
/// parameters and the traffic counters.
pub struct NotificationModule {
    cell: NotificationCell,
    traffic: Arc<dyn TrafficSource>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationModule {
    pub fn new(cell: NotificationCell, traffic: Arc<dyn TrafficSource>, interval: Duration) -> Self {
        Self {
            cell,
            traffic,
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.task.lock().is_ok_and(|task| task.is_some())
    }
}

impl Module for NotificationModule {
    fn name(&self) -> &'static str {
        "notification"
    }

    fn install(&self) -> Result<(), WorkerError> {
        let mut task = self
            .task
            .lock()
            .map_err(|_| WorkerError::StartFailed("notification module lock poisoned".into()))?;
        if task.is_some() {
            return Ok(());
        }

        let cell = self.cell.clone();
        let source = Arc::clone(&self.traffic);
        let interval = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await; // Skip first immediate tick
            let mut last: Option<Traffic> = None;
            loop {
                timer.tick().await;
                let params = cell.latest().unwrap_or_default();
                let total = source.traffic(params.only_statistics_proxy);
                let delta = last.map_or(Traffic::default(), |prev| total.since(&prev));
                last = Some(total);
                info!(
                    title = %params.title,
                    status = %delta.rate_text(interval),
                    "Status notification"
                );
            }
        }));
        Ok(())
    }

    fn uninstall(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}
