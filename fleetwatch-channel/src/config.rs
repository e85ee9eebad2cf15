//! Channel configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::error::ConfigError;

/// Tunables for a [`TelemetryChannel`](crate::TelemetryChannel).
///
/// Field names are snake_case; the camelCase names used by dashboard
/// configuration files (`livenessWindowMs`, `logCapacity`, ...) are accepted
/// as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Maximum gap since the last heartbeat before an agent is offline.
    #[serde(alias = "livenessWindowMs")]
    pub liveness_window_ms: u64,

    /// Capacity of the log ring buffer.
    #[serde(alias = "logCapacity")]
    pub log_capacity: usize,

    /// First reconnect delay.
    #[serde(alias = "backoffBaseMs")]
    pub backoff_base_ms: u64,

    /// Upper bound for reconnect delays.
    #[serde(alias = "backoffCapMs")]
    pub backoff_cap_ms: u64,

    /// Multiplier applied per consecutive failure.
    #[serde(alias = "backoffFactor")]
    pub backoff_factor: f64,

    /// Relative jitter applied to every delay (0.2 = ±20%).
    #[serde(alias = "backoffJitter")]
    pub backoff_jitter: f64,

    /// Reconnect automatically after the transport drops.
    #[serde(alias = "reconnectEnabled")]
    pub reconnect_enabled: bool,

    /// Give up (state `failed`) after this many consecutive failed reconnects.
    /// `None` retries forever.
    #[serde(alias = "maxReconnectAttempts")]
    pub max_reconnect_attempts: Option<u32>,

    /// Period of the liveness re-evaluation timer.
    #[serde(alias = "tickIntervalMs")]
    pub tick_interval_ms: u64,

    /// Bursts of changes within this window produce a single notification.
    #[serde(alias = "coalesceWindowMs")]
    pub coalesce_window_ms: u64,

    /// Bound on a single connect attempt.
    #[serde(alias = "connectTimeoutMs")]
    pub connect_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            liveness_window_ms: 60_000,
            log_capacity: 500,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            backoff_factor: 2.0,
            backoff_jitter: 0.2,
            reconnect_enabled: true,
            max_reconnect_attempts: None,
            tick_interval_ms: 5_000,
            coalesce_window_ms: 100,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ChannelConfig {
    /// Check that the values make sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.liveness_window_ms == 0 {
            return Err(ConfigError::new("liveness_window_ms", "must be greater than zero"));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::new("log_capacity", "must be greater than zero"));
        }
        if self.backoff_base_ms == 0 {
            return Err(ConfigError::new("backoff_base_ms", "must be greater than zero"));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::new("backoff_cap_ms", "must not be below backoff_base_ms"));
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(ConfigError::new("backoff_factor", "must be at least 1.0"));
        }
        if !(0.0..1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::new("backoff_jitter", "must be within [0, 1)"));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::new("tick_interval_ms", "must be greater than zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::new("connect_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Number of reconnects allowed after a loss; `None` is unbounded.
    pub fn retry_budget(&self) -> Option<u32> {
        if self.reconnect_enabled {
            self.max_reconnect_attempts
        } else {
            Some(0)
        }
    }

    /// The backoff policy described by this config.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.backoff_base_ms),
            factor: self.backoff_factor,
            cap: Duration::from_millis(self.backoff_cap_ms),
            jitter: self.backoff_jitter,
        }
    }
}
