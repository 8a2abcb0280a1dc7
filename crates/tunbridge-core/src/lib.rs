//! `tunbridge` Core Library
//!
//! Shared functionality for the foreground client and the worker process:
//! - Run-state, tunnel options, notification and traffic models
//! - NDJSON wire protocol spoken over the worker's stdio
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod models;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{NotificationParams, RunState, Traffic, TunnelOptions, WorkerMode};
