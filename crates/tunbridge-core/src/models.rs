//! Data model shared by the foreground client and the worker process.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run state of the tunnel as seen by the foreground process.
///
/// `Pending` is a transient guard entered before a transition and exited
/// only by the transition that entered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Stopped,
    Pending,
    Running,
}

impl RunState {
    /// Whether the state is a terminal (non-transient) one.
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Which worker implementation a start request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// Worker runs without routing traffic through the privileged capability.
    Plain,
    /// Worker routes traffic through the privileged tunnel.
    Tunneling,
}

impl std::fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Tunneling => write!(f, "tunneling"),
        }
    }
}

/// Desired worker configuration, supplied by the UI and passed to the worker
/// verbatim.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TunnelOptions {
    /// Route traffic through the tunnel.
    pub enable: bool,
    /// Opaque configuration for the tunneling engine.
    #[serde(default)]
    pub payload: Value,
}

impl TunnelOptions {
    pub const fn plain() -> Self {
        Self {
            enable: false,
            payload: Value::Null,
        }
    }

    pub const fn tunneling(payload: Value) -> Self {
        Self {
            enable: true,
            payload,
        }
    }

    /// The worker implementation these options require.
    pub const fn mode(&self) -> WorkerMode {
        if self.enable {
            WorkerMode::Tunneling
        } else {
            WorkerMode::Plain
        }
    }
}

/// Parameters for the worker's status notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationParams {
    pub title: String,
    pub stop_text: String,
    #[serde(default)]
    pub only_statistics_proxy: bool,
}

impl Default for NotificationParams {
    fn default() -> Self {
        Self {
            title: "tunbridge".to_string(),
            stop_text: "Stop".to_string(),
            only_statistics_proxy: false,
        }
    }
}

/// Byte counters reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Traffic {
    pub up: u64,
    pub down: u64,
}

impl Traffic {
    pub const fn new(up: u64, down: u64) -> Self {
        Self { up, down }
    }

    /// Bytes transferred since an `earlier` cumulative sample.
    #[must_use]
    pub const fn since(&self, earlier: &Self) -> Self {
        Self {
            up: self.up.saturating_sub(earlier.up),
            down: self.down.saturating_sub(earlier.down),
        }
    }

    /// Per-second rate of this sample taken over `interval`.
    ///
    /// A zero interval is treated as one second.
    #[must_use]
    pub fn rate_over(&self, interval: Duration) -> Self {
        if interval.is_zero() {
            return *self;
        }
        let millis = interval.as_millis().max(1);
        let per_sec = |bytes: u64| -> u64 {
            let scaled = u128::from(bytes) * 1000 / millis;
            u64::try_from(scaled).unwrap_or(u64::MAX)
        };
        Self {
            up: per_sec(self.up),
            down: per_sec(self.down),
        }
    }

    /// Rate line for a sample already expressed per second.
    pub fn speed_text(&self) -> String {
        format!(
            "{}/s ↑  {}/s ↓",
            format_bytes(self.up),
            format_bytes(self.down)
        )
    }

    /// Rate line for a sample collected over `interval`.
    pub fn rate_text(&self, interval: Duration) -> String {
        self.rate_over(interval).speed_text()
    }
}

/// Human-readable byte count, 1024-based.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    #[allow(clippy::cast_precision_loss)]
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{size:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn run_state_defaults_to_stopped() {
        assert_eq!(RunState::default(), RunState::Stopped);
        assert!(RunState::Running.is_settled());
        assert!(!RunState::Pending.is_settled());
    }

    #[test]
    fn options_mode_follows_enable_flag() {
        assert_eq!(TunnelOptions::plain().mode(), WorkerMode::Plain);
        assert_eq!(
            TunnelOptions::tunneling(serde_json::json!({"dns": true})).mode(),
            WorkerMode::Tunneling
        );
    }

    #[test]
    fn options_payload_defaults_to_null() {
        let options: TunnelOptions = serde_json::from_str(r#"{"enable":true}"#).unwrap();
        assert!(options.enable);
        assert!(options.payload.is_null());
    }

    #[test]
    fn notification_params_use_camel_case() {
        let params: NotificationParams =
            serde_json::from_str(r#"{"title":"t","stopText":"Halt","onlyStatisticsProxy":true}"#)
                .unwrap();
        assert_eq!(params.stop_text, "Halt");
        assert!(params.only_statistics_proxy);
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(1023), "1023B");
        assert_eq!(format_bytes(1024), "1.0KB");
        assert_eq!(format_bytes(1536), "1.5KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0GB");
    }

    #[test]
    fn format_bytes_caps_at_terabytes() {
        let pb = 1024_u64.pow(5);
        assert_eq!(format_bytes(pb), "1024.0TB");
    }

    #[test]
    fn speed_text_layout() {
        let traffic = Traffic::new(2048, 100);
        assert_eq!(traffic.speed_text(), "2.0KB/s ↑  100B/s ↓");
    }

    #[test]
    fn rate_divides_by_interval() {
        let sample = Traffic::new(4096, 1000);
        let rate = sample.rate_over(Duration::from_secs(2));
        assert_eq!(rate, Traffic::new(2048, 500));
        assert_eq!(sample.rate_text(Duration::from_secs(2)), "2.0KB/s ↑  500B/s ↓");
    }

    #[test]
    fn since_saturates_on_counter_reset() {
        let earlier = Traffic::new(500, 900);
        assert_eq!(Traffic::new(800, 1000).since(&earlier), Traffic::new(300, 100));
        assert_eq!(Traffic::new(10, 10).since(&earlier), Traffic::new(0, 0));
    }

    #[test]
    fn rate_with_zero_interval_is_identity() {
        let sample = Traffic::new(10, 20);
        assert_eq!(sample.rate_over(Duration::ZERO), sample);
    }
}
