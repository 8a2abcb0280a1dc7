//! `tunbridge` Client Library
//!
//! Foreground side of the bridge to the tunnel worker:
//! - Bind-flow: a worker link observed as connection events
//! - Connection manager: one lazily bound, crash-aware worker connection
//! - RPC proxy speaking the worker's NDJSON protocol over a subprocess link
//! - Run-state machine coordinating start/stop with user consent

pub mod bind_flow;
pub mod collaborator;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod link;
pub mod rpc;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

pub use bind_flow::{
    BindFlow, Binding, ConnectionEvent, DisconnectReason, LinkEvents, ProcessLink, RawBinder,
};
pub use collaborator::{ConfigCollaborator, ConsentScope, UiCollaborator};
pub use connection::{ConnectionManager, ConnectionState, DEFAULT_CONNECT_TIMEOUT};
pub use error::BridgeError;
pub use lifecycle::Lifecycle;
pub use link::SubprocessLink;
pub use rpc::{RemoteWorker, WorkerRpc};
