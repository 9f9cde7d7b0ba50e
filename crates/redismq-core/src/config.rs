use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration, deserializable from TOML. Every section and
/// field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub redis: RedisConfig,
    pub consumer: ConsumerConfig,
    pub heartbeat: HeartbeatConfig,
    pub gc: GcConfig,
    pub producer: ProducerConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

/// Per-consumer message handling options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Upper bound on one handler invocation; 0 disables the timeout.
    pub message_consume_timeout_ms: u64,
    /// Consumer-wide message TTL counted from creation; 0 disables it.
    pub message_ttl_ms: u64,
    /// A message whose attempts exceed this is dead-lettered.
    pub message_retry_threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
    /// Must comfortably exceed `interval_ms`, or a live consumer looks dead
    /// between beats.
    pub ttl_ms: u64,
}

/// Reclaimer pacing and leader election.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    pub lock_retry_interval_ms: u64,
    pub scan_interval_ms: u64,
    pub lock_tie_break_ttl_ms: u64,
    pub scan_page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub lock_ttl_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Record rate counters through OpenTelemetry.
    pub enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            message_consume_timeout_ms: 0,
            message_ttl_ms: 0,
            message_retry_threshold: 3,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            ttl_ms: 10_000,
        }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            lock_retry_interval_ms: 2000,
            scan_interval_ms: 2000,
            lock_tie_break_ttl_ms: 60_000,
            scan_page_size: 100,
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self { lock_ttl_ms: 2000 }
    }
}

impl ConsumerConfig {
    pub fn consume_timeout(&self) -> Option<Duration> {
        (self.message_consume_timeout_ms > 0)
            .then(|| Duration::from_millis(self.message_consume_timeout_ms))
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl GcConfig {
    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock_retry_interval_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn lock_tie_break_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_tie_break_ttl_ms)
    }
}

impl ProducerConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }
}

impl Config {
    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
