//! tunbridge CLI
//!
//! Starts the tunnel through the worker process and keeps it running until
//! interrupted, or sends a single opaque request to the worker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tunbridge_client::{
    ConfigCollaborator, ConnectionManager, Lifecycle, RemoteWorker, SubprocessLink,
};
use tunbridge_core::Traffic;
use tunbridge_core::config::load_config;
use tunbridge_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "tunbridge")]
#[command(version, about = "tunbridge - control the tunnel worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file layered over the global one
    #[arg(long, global = true, env = "TUNBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Worker binary to spawn
    #[arg(long, global = true)]
    worker_bin: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug")
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, global = true, env = "TUNBRIDGE_LOG_JSON")]
    log_json: bool,

    /// Grant consent prompts without asking
    #[arg(short, long, global = true)]
    yes: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the tunnel and keep it up until Ctrl-C
    Run {
        /// Seconds between traffic reports
        #[arg(long, default_value_t = 5)]
        report_secs: u64,
    },
    /// Send one opaque request to the worker and print the reply
    Invoke { payload: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(worker_bin) = cli.worker_bin {
        config.client.worker_bin = worker_bin;
    }

    let level = cli.log_level.unwrap_or_else(|| config.client.log_level.clone());
    init_tracing(
        &format!("tunbridge={level},tunbridge_client={level},tunbridge_core={level}"),
        cli.log_json,
    );
    info!(version = env!("CARGO_PKG_VERSION"), "Starting tunbridge");

    let link = Arc::new(SubprocessLink::from_config(&config.client));
    let connection =
        ConnectionManager::<RemoteWorker>::with_timeout(link, config.client.connect_timeout());
    let ui = Arc::new(ConfigCollaborator::new(config.tunnel.clone(), cli.yes));
    let lifecycle = Lifecycle::new(connection, ui);

    let result = match cli.command {
        Command::Run { report_secs } => run(&lifecycle, &config, report_secs).await,
        Command::Invoke { payload } => invoke(&lifecycle, payload).await,
    };

    lifecycle.shutdown().await;
    result
}

async fn run(
    lifecycle: &Lifecycle<RemoteWorker, ConfigCollaborator>,
    config: &tunbridge_core::Config,
    report_secs: u64,
) -> anyhow::Result<()> {
    lifecycle.attach_message_channel().await?;
    lifecycle
        .update_notification_params(config.notification.clone())
        .await?;
    lifecycle.start().await?;

    let interval = Duration::from_secs(report_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    let mut states = lifecycle.subscribe();
    let mut last = Traffic::default();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                if state.is_settled() {
                    info!(%state, runtime_secs = lifecycle.runtime_seconds().await, "Run state");
                }
            }
            _ = ticker.tick() => {
                match lifecycle.traffic(config.notification.only_statistics_proxy).await {
                    Ok(total) => {
                        info!(
                            runtime_secs = lifecycle.runtime_seconds().await,
                            rate = %total.since(&last).rate_text(interval),
                            "Traffic"
                        );
                        last = total;
                    }
                    Err(e) => warn!(error = %e, "Traffic query failed"),
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn invoke(
    lifecycle: &Lifecycle<RemoteWorker, ConfigCollaborator>,
    payload: String,
) -> anyhow::Result<()> {
    let reply = lifecycle.invoke(payload).await?;
    println!("{reply}");
    Ok(())
}
