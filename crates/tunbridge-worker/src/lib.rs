//! tunbridge Worker Library
//!
//! Runs inside the worker process:
//! - Dispatcher routing foreground RPCs to the resident implementation
//! - Binding of plain vs tunneling implementations
//! - Notification parameter cell and status modules
//! - NDJSON server over stdio

pub mod binding;
pub mod capability;
pub mod dispatcher;
pub mod error;
pub mod notification;
pub mod runner;
pub mod server;

pub use binding::{BoundImplementation, ImplementationBinder, LocalBinder};
pub use capability::{Capability, LoopbackCapability, TrafficSource};
pub use dispatcher::{BindingState, Dispatcher, RunContext};
pub use error::WorkerError;
pub use notification::NotificationCell;
pub use server::serve;
