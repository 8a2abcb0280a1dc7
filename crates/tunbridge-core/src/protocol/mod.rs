//! NDJSON wire protocol between the foreground client and the worker.
//!
//! One JSON object per line over the worker's stdin (requests) and stdout
//! (handshake, responses, pushed messages).

mod codec;
mod types;

pub use codec::{encode_line, parse_frame, parse_request};
pub use types::*;
