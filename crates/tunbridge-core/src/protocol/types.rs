//! Frame types for the worker RPC protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{NotificationParams, TunnelOptions};

/// Interface name announced by a compatible worker in its `Hello` frame.
pub const INTERFACE_NAME: &str = "tunbridge.worker";

/// Protocol revision announced alongside [`INTERFACE_NAME`].
pub const PROTOCOL_VERSION: u32 = 1;

/// A request from the foreground process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub call: Call,
}

/// Operations exposed by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Call {
    /// Opaque action handled by the worker's core capability.
    Invoke { payload: String },
    Start {
        options: TunnelOptions,
        from_foreground_app: bool,
    },
    Stop,
    /// Start forwarding pushed messages to the foreground.
    SetMessageCallback,
    UpdateNotificationParams { params: NotificationParams },
    QueryTraffic {
        #[serde(default)]
        only_proxy: bool,
    },
}

impl Call {
    /// Short name used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Invoke { .. } => "invoke",
            Self::Start { .. } => "start",
            Self::Stop => "stop",
            Self::SetMessageCallback => "set_message_callback",
            Self::UpdateNotificationParams { .. } => "update_notification_params",
            Self::QueryTraffic { .. } => "query_traffic",
        }
    }
}

/// Frames written by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    /// First line after spawn; identifies the exposed interface.
    Hello { interface: String, version: u32 },
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Asynchronous push delivered through the message callback.
    Message { payload: String },
}

impl WorkerFrame {
    /// The handshake frame of this build.
    pub fn hello() -> Self {
        Self::Hello {
            interface: INTERFACE_NAME.to_string(),
            version: PROTOCOL_VERSION,
        }
    }

    pub const fn ok(id: u64, result: Value) -> Self {
        Self::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub const fn err(id: u64, message: String) -> Self {
        Self::Response {
            id,
            result: None,
            error: Some(message),
        }
    }
}

/// Outcome of a call as carried by a `Response` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: u64,
    pub outcome: std::result::Result<Value, String>,
}

impl Reply {
    /// Split a `Response` frame into a reply; other frames are returned as-is.
    pub fn from_frame(frame: WorkerFrame) -> std::result::Result<Self, WorkerFrame> {
        match frame {
            WorkerFrame::Response { id, result, error } => {
                let outcome = match error {
                    Some(message) => Err(message),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                Ok(Self { id, outcome })
            }
            other => Err(other),
        }
    }
}

/// Whether a handshake matches what this build expects.
pub fn interface_matches(interface: &str, version: u32) -> bool {
    interface == INTERFACE_NAME && version == PROTOCOL_VERSION
}
