//! Configuration resolution for tunbridge.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/tunbridge/settings.json)
//! 3. Explicit config file (e.g. `--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binaries)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{NotificationParams, TunnelOptions};

/// Complete tunbridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Options handed to the worker on start. Absent means the UI has not
    /// supplied any yet.
    #[serde(default)]
    pub tunnel: Option<TunnelOptions>,
    #[serde(default)]
    pub notification: NotificationParams,
}

/// Foreground-side connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Worker binary spawned by the subprocess link.
    pub worker_bin: PathBuf,
    /// Extra arguments passed to the worker binary.
    pub worker_args: Vec<String>,
    /// Upper bound for a bind attempt (seconds).
    pub connect_timeout_secs: u64,
    /// Upper bound for a single RPC (seconds).
    pub call_timeout_secs: u64,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            worker_bin: PathBuf::from("tunbridge-worker"),
            worker_args: Vec::new(),
            connect_timeout_secs: 10,
            call_timeout_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Worker-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How often the status notification is refreshed (milliseconds).
    pub traffic_interval_ms: u64,
    pub log_level: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            traffic_interval_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl WorkerConfig {
    pub const fn traffic_interval(&self) -> Duration {
        Duration::from_millis(self.traffic_interval_ms)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            let global = load_config_file(&global_path)?;
            merge_config(&mut config, global);
        }
    }

    if let Some(path) = explicit {
        let overlay = load_config_file(path)?;
        merge_config(&mut config, overlay);
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".tunbridge").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/tunbridge/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("tunbridge").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Read and parse one settings file.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.client = overlay.client;
    base.worker = overlay.worker;
    base.notification = overlay.notification;
    if overlay.tunnel.is_some() {
        base.tunnel = overlay.tunnel;
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("TUNBRIDGE_WORKER_BIN") {
        config.client.worker_bin = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("TUNBRIDGE_CONNECT_TIMEOUT_SECS") {
        if let Ok(n) = val.parse() {
            config.client.connect_timeout_secs = n;
        }
    }
    if let Ok(val) = std::env::var("TUNBRIDGE_CALL_TIMEOUT_SECS") {
        if let Ok(n) = val.parse() {
            config.client.call_timeout_secs = n;
        }
    }
    if let Ok(val) = std::env::var("TUNBRIDGE_LOG_LEVEL") {
        config.client.log_level.clone_from(&val);
        config.worker.log_level = val;
    }
}
