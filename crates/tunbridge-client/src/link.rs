//! Worker subprocess link.
//!
//! Spawns the worker binary and speaks the NDJSON protocol over its stdio.
//! The worker's stderr is forwarded to tracing.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use tunbridge_core::config::ClientConfig;
use tunbridge_core::protocol::{WorkerFrame, interface_matches, parse_frame};

use crate::bind_flow::{Binding, LinkEvents, ProcessLink, RawBinder};
use crate::error::BridgeError;
use crate::rpc::RemoteWorker;

/// [`ProcessLink`] that runs the worker as a child process.
#[derive(Debug, Clone)]
pub struct SubprocessLink {
    worker_bin: PathBuf,
    args: Vec<String>,
    call_timeout: Duration,
    /// Grace period between closing stdin and killing the worker.
    terminate_timeout: Duration,
}

impl SubprocessLink {
    pub fn new(worker_bin: impl Into<PathBuf>, args: Vec<String>, call_timeout: Duration) -> Self {
        Self {
            worker_bin: worker_bin.into(),
            args,
            call_timeout,
            terminate_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.worker_bin.clone(),
            config.worker_args.clone(),
            config.call_timeout(),
        )
    }
}

impl ProcessLink for SubprocessLink {
    fn bind(&self, events: LinkEvents) -> Result<Box<dyn Binding>, BridgeError> {
        let mut cmd = Command::new(&self.worker_bin);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(worker_bin = %self.worker_bin.display(), args = ?self.args, "Spawning worker");
        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::ConnectFailed(format!("{}: {e}", self.worker_bin.display()))
        })?;
        let pid = child.id().unwrap_or_default();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::ConnectFailed("Failed to capture worker stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::ConnectFailed("Failed to capture worker stdout".into()))?;

        let (frame_tx, frame_rx) = mpsc::channel::<String>(32);
        let remote = Arc::new(RemoteWorker::new(frame_tx, self.call_timeout));
        let writer = tokio::spawn(write_requests(stdin, frame_rx));
        let reader = tokio::spawn(read_frames(stdout, Arc::clone(&remote), events));

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(pid, "worker: {}", line);
                }
                debug!(pid, "Worker stderr closed");
            });
        }

        Ok(Box::new(SubprocessBinding {
            pid,
            child,
            remote,
            reader: reader.abort_handle(),
            writer: writer.abort_handle(),
            terminate_timeout: self.terminate_timeout,
        }))
    }
}

struct SubprocessBinding {
    pid: u32,
    child: Child,
    /// Shared with callers holding the handle; failed on unbind.
    remote: Arc<RemoteWorker>,
    reader: AbortHandle,
    writer: AbortHandle,
    terminate_timeout: Duration,
}

impl Binding for SubprocessBinding {
    fn unbind(self: Box<Self>) {
        let Self {
            pid,
            mut child,
            remote,
            reader,
            writer,
            terminate_timeout,
        } = *self;
        info!(pid, "Unbinding worker");
        // New calls are refused from here on.
        remote.close();
        reader.abort();
        // Dropping stdin lets the worker stop its implementation and exit.
        writer.abort();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // kill_on_drop takes care of the child.
            return;
        };
        runtime.spawn(async move {
            remote.fail_all_pending().await;
            match tokio::time::timeout(terminate_timeout, child.wait()).await {
                Ok(Ok(status)) => info!(pid, ?status, "Worker exited"),
                Ok(Err(e)) => {
                    warn!(pid, error = %e, "Error waiting for worker");
                    child.kill().await.ok();
                }
                Err(_) => {
                    warn!(pid, "Timeout waiting for worker shutdown, killing");
                    child.kill().await.ok();
                }
            }
        });
    }
}

async fn write_requests(mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            error!("Failed to write to worker stdin: {}", e);
            break;
        }
        if let Err(e) = stdin.write_all(b"\n").await {
            error!("Failed to write newline: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            error!("Failed to flush worker stdin: {}", e);
            break;
        }
    }
}

/// Read the handshake, then feed frames to `remote` until stdout closes.
async fn read_frames(stdout: ChildStdout, remote: Arc<RemoteWorker>, events: LinkEvents) {
    let mut lines = BufReader::new(stdout).lines();
    let mut connected = false;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed reading worker stdout");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame = match parse_frame(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Skipping malformed worker line");
                continue;
            }
        };

        if connected {
            remote.dispatch_frame(frame).await;
            continue;
        }
        match frame {
            WorkerFrame::Hello { interface, version } if interface_matches(&interface, version) => {
                info!(%interface, version, "Worker connected");
                events.connected(RawBinder::new(interface, Arc::clone(&remote)));
                connected = true;
            }
            WorkerFrame::Hello { interface, version } => {
                warn!(%interface, version, "Worker announced an incompatible interface");
                // Hand over the raw handshake; the flow reports the type mismatch.
                let handshake = WorkerFrame::Hello {
                    interface: interface.clone(),
                    version,
                };
                events.connected(RawBinder::new(
                    format!("{interface}/v{version}"),
                    Arc::new(handshake),
                ));
            }
            other => debug!(frame = ?other, "Frame before handshake, ignoring"),
        }
    }

    remote.fail_all_pending().await;
    info!("Worker stdout closed");
    events.died();
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::bind_flow::{BindFlow, ConnectionEvent, DisconnectReason};
    use crate::connection::ConnectionManager;
    use crate::rpc::WorkerRpc;

    const HELLO: &str = r#"echo '{"type":"hello","interface":"tunbridge.worker","version":1}'"#;

    fn shell(script: &str) -> SubprocessLink {
        SubprocessLink::new(
            "sh",
            vec!["-c".into(), script.into()],
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn missing_binary_fails_bind() {
        let link = SubprocessLink::new(
            "/nonexistent/tunbridge-worker",
            Vec::new(),
            Duration::from_secs(5),
        );
        let mut flow = BindFlow::<RemoteWorker>::open(&link);
        assert!(matches!(
            flow.next().await,
            Some(ConnectionEvent::Disconnected(DisconnectReason::BindFailed(_)))
        ));
        assert!(flow.next().await.is_none());
    }

    #[tokio::test]
    async fn handshake_connects_and_exit_is_a_crash() {
        let link = shell(HELLO);
        let mut flow = BindFlow::<RemoteWorker>::open(&link);

        let Some(ConnectionEvent::Connected(worker)) = flow.next().await else {
            panic!("expected connected");
        };
        assert!(matches!(
            flow.next().await,
            Some(ConnectionEvent::Disconnected(DisconnectReason::Crashed))
        ));
        assert!(worker.is_closed());
    }

    #[tokio::test]
    async fn incompatible_handshake_is_invalid_binder() {
        let link = shell(r#"echo '{"type":"hello","interface":"tunbridge.worker","version":99}'; sleep 5"#);
        let mut flow = BindFlow::<RemoteWorker>::open(&link);

        let Some(ConnectionEvent::Disconnected(DisconnectReason::InvalidBinderType { actual, .. })) =
            flow.next().await
        else {
            panic!("expected invalid binder type");
        };
        assert_eq!(actual, "tunbridge.worker/v99");
    }

    #[tokio::test]
    async fn exit_before_handshake_is_connect_failure() {
        let manager = ConnectionManager::<RemoteWorker>::new(Arc::new(shell("exit 1")));
        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectFailed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn release_fails_calls_in_flight() {
        let link = SubprocessLink::new(
            "sh",
            vec!["-c".into(), format!("{HELLO}; cat >/dev/null")],
            Duration::from_secs(30),
        );
        let manager = ConnectionManager::<RemoteWorker>::new(Arc::new(link));
        let worker = manager.acquire().await.unwrap();

        let call = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.invoke("never answered".into()).await })
        };
        while worker.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }

        let released = Instant::now();
        manager.release().await;
        let result = tokio::time::timeout(Duration::from_secs(5), call)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result, Err(BridgeError::LinkLost));
        assert!(released.elapsed() < Duration::from_secs(5));
        assert!(worker.is_closed());
        assert_eq!(worker.invoke("after".into()).await, Err(BridgeError::LinkLost));
    }
}
