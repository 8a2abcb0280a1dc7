//! NDJSON RPC server over the worker's stdio.
//!
//! Requests are processed strictly one after another, which is what keeps
//! the [`RunContext`](crate::RunContext) free of concurrent access.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tunbridge_core::protocol::{WorkerFrame, encode_line, parse_request};

use crate::binding::ImplementationBinder;
use crate::capability::Capability;
use crate::dispatcher::Dispatcher;
use crate::error::WorkerError;

/// Serve requests from `reader` until it closes, writing frames to `writer`.
///
/// Messages received on `messages` are forwarded once the foreground has
/// registered its callback and dropped otherwise; queued messages are drained
/// before the next request is read. On exit the resident implementation is
/// stopped.
pub async fn serve<R, W, B, C>(
    reader: R,
    writer: W,
    mut dispatcher: Dispatcher<B, C>,
    mut messages: mpsc::Receiver<String>,
) -> Result<(), WorkerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    B: ImplementationBinder,
    C: Capability,
{
    let mut writer = writer;
    write_frame(&mut writer, &WorkerFrame::hello()).await?;
    info!("Worker ready");

    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            biased;

            Some(payload) = messages.recv() => {
                if dispatcher.forwards_messages() {
                    write_frame(&mut writer, &WorkerFrame::Message { payload }).await?;
                } else {
                    debug!("No message callback registered, dropping message");
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Request stream closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_request(&line) {
                    Ok(request) => {
                        let frame = dispatcher.handle(request).await;
                        write_frame(&mut writer, &frame).await?;
                    }
                    Err(e) => warn!(error = %e, "Skipping malformed request"),
                }
            }
        }
    }

    dispatcher.stop();
    Ok(())
}

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &WorkerFrame,
) -> Result<(), WorkerError> {
    let line = encode_line(frame)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
