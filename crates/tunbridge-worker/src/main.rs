//! tunbridge Worker
//!
//! Background process spawned by the foreground client. Speaks the NDJSON
//! RPC protocol on stdin/stdout and logs to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use tunbridge_core::config::{WorkerConfig, load_config};
use tunbridge_core::tracing_init::init_tracing;
use tunbridge_worker::{Dispatcher, LocalBinder, LoopbackCapability, NotificationCell, serve};

#[derive(Parser, Debug)]
#[command(name = "tunbridge-worker")]
#[command(version, about = "tunbridge worker - runs the tunnel implementation")]
struct Args {
    /// Settings file layered over the global one
    #[arg(long, env = "TUNBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug")
    #[arg(long, env = "TUNBRIDGE_WORKER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "TUNBRIDGE_LOG_JSON")]
    log_json: bool,

    /// Status notification refresh interval in milliseconds
    #[arg(long)]
    traffic_interval_ms: Option<u64>,
}

impl Args {
    /// Log level and status interval, flags taking precedence over settings.
    fn resolve(&self, worker: &WorkerConfig) -> (String, Duration) {
        let level = self
            .log_level
            .clone()
            .unwrap_or_else(|| worker.log_level.clone());
        let interval = self
            .traffic_interval_ms
            .map_or_else(|| worker.traffic_interval(), Duration::from_millis);
        (level, interval)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let (level, interval) = args.resolve(&config.worker);
    init_tracing(&format!("tunbridge_worker={level}"), args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        interval_ms = interval.as_millis(),
        "Starting tunbridge worker"
    );

    let (message_tx, message_rx) = mpsc::channel(64);
    let capability = Arc::new(LoopbackCapability::new().with_messages(message_tx));
    let notifications = NotificationCell::new();
    notifications.publish(config.notification);
    let binder = LocalBinder::new(notifications.clone(), capability.clone(), interval);
    let dispatcher = Dispatcher::new(binder, capability, notifications);

    serve(tokio::io::stdin(), tokio::io::stdout(), dispatcher, message_rx).await?;

    info!("Worker exiting");
    Ok(())
}
