//! Line encoding and tolerant parsing for protocol frames.

use serde::Serialize;

use super::types::{Request, WorkerFrame};
use crate::error::{Error, Result};

/// Serialize a frame to a single line (without the trailing newline).
pub fn encode_line<T: Serialize>(frame: &T) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse one line written by the worker.
pub fn parse_frame(line: &str) -> Result<WorkerFrame> {
    serde_json::from_str(line.trim())
        .map_err(|e| Error::Protocol(format!("Invalid worker frame: {e}")))
}

/// Parse one request line written by the foreground process.
pub fn parse_request(line: &str) -> Result<Request> {
    serde_json::from_str(line.trim()).map_err(|e| Error::Protocol(format!("Invalid request: {e}")))
}
