//! Buffering configuration.
//!
//! Loaded once at startup from a JSON file, validated, then passed by value
//! into the components that need it. Key names match the historic config
//! file format.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Defaults ───────────────────────────────────────────────────────

const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_INIT_BUFFER_TTL_SECS: u64 = 30;
const DEFAULT_FLAP_COUNT_THRESHOLD: u64 = 5;
const DEFAULT_FLAP_WINDOW_SECS: u64 = 60;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 100;
const DEFAULT_COMPACT_INTERVAL_SECS: u64 = 60;

// ─── Limits ─────────────────────────────────────────────────────────

/// The flap window allocates one bucket per second per service.
pub const MAX_FLAP_WINDOW_SECS: u64 = 86_400;
pub const MAX_SWEEP_INTERVAL_MS: u64 = 3_600_000;
pub const MAX_COMPACT_INTERVAL_SECS: u64 = 86_400;
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("init buffer ttl ({init_buffer_ttl_secs}s) cannot be greater than message cache ttl ({cache_ttl_secs}s)")]
    InitBufferExceedsCacheTtl {
        init_buffer_ttl_secs: u64,
        cache_ttl_secs: u64,
    },

    #[error("gateway message buffer size must be at least 1")]
    ZeroQueueCapacity,

    #[error("flap count threshold must be at least 1")]
    ZeroFlapThreshold,

    #[error("flap window must be at least 1 second")]
    ZeroFlapWindow,

    #[error("sweep interval must be at least 1 millisecond")]
    ZeroSweepInterval,

    #[error("{key} is {value}, the maximum is {max}")]
    TooLarge {
        key: &'static str,
        value: u64,
        max: u64,
    },
}

// ─── BufferConfig ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Capacity of the bounded gateway inbound queue.
    #[serde(rename = "gateway_message_buffer_size")]
    pub gateway_queue_capacity: usize,

    /// Silence after which a service's last state expires.
    #[serde(rename = "message_cache_ttl_in_seconds")]
    pub cache_ttl_secs: u64,

    /// How long a newly reported state is held before it is acted on.
    #[serde(rename = "message_init_buffer_ttl_in_seconds")]
    pub init_buffer_ttl_secs: u64,

    /// Transitions within the flap window at which a service is flapping.
    pub flap_count_threshold: u64,

    #[serde(rename = "flap_window_in_seconds")]
    pub flap_window_secs: u64,

    pub sweep_interval_ms: u64,

    #[serde(rename = "compact_interval_in_seconds")]
    pub compact_interval_secs: u64,

    /// Hold state changes for flapping services instead of forwarding them.
    pub suppress_flapping: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            gateway_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            init_buffer_ttl_secs: DEFAULT_INIT_BUFFER_TTL_SECS,
            flap_count_threshold: DEFAULT_FLAP_COUNT_THRESHOLD,
            flap_window_secs: DEFAULT_FLAP_WINDOW_SECS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            compact_interval_secs: DEFAULT_COMPACT_INTERVAL_SECS,
            suppress_flapping: false,
        }
    }
}

impl BufferConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON document. Missing keys take defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.init_buffer_ttl_secs > self.cache_ttl_secs {
            return Err(ConfigError::InitBufferExceedsCacheTtl {
                init_buffer_ttl_secs: self.init_buffer_ttl_secs,
                cache_ttl_secs: self.cache_ttl_secs,
            });
        }
        if self.gateway_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.flap_count_threshold == 0 {
            return Err(ConfigError::ZeroFlapThreshold);
        }
        if self.flap_window_secs == 0 {
            return Err(ConfigError::ZeroFlapWindow);
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }
        let queue_capacity = u64::try_from(self.gateway_queue_capacity).unwrap_or(u64::MAX);
        check_max("gateway_message_buffer_size", queue_capacity, MAX_QUEUE_CAPACITY as u64)?;
        check_max("flap_window_in_seconds", self.flap_window_secs, MAX_FLAP_WINDOW_SECS)?;
        check_max("sweep_interval_ms", self.sweep_interval_ms, MAX_SWEEP_INTERVAL_MS)?;
        check_max(
            "compact_interval_in_seconds",
            self.compact_interval_secs,
            MAX_COMPACT_INTERVAL_SECS,
        )?;
        Ok(())
    }

    pub fn cache_ttl(&self) -> TimeDelta {
        secs_to_delta(self.cache_ttl_secs)
    }

    pub fn init_buffer_ttl(&self) -> TimeDelta {
        secs_to_delta(self.init_buffer_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn compact_interval(&self) -> Duration {
        Duration::from_secs(self.compact_interval_secs)
    }
}

fn check_max(key: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::TooLarge { key, value, max });
    }
    Ok(())
}

fn secs_to_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or_else(TimeDelta::max_value)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BufferConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.init_buffer_ttl() <= config.cache_ttl());
    }

    #[test]
    fn parses_historic_key_names() {
        let config = BufferConfig::from_json(
            r#"{
                "gateway_message_buffer_size": 16,
                "message_cache_ttl_in_seconds": 120,
                "message_init_buffer_ttl_in_seconds": 10,
                "flap_count_threshold": 3
            }"#,
        )
        .expect("valid config");

        assert_eq!(config.gateway_queue_capacity, 16);
        assert_eq!(config.cache_ttl_secs, 120);
        assert_eq!(config.init_buffer_ttl_secs, 10);
        assert_eq!(config.flap_count_threshold, 3);
        // Unspecified keys fall back to defaults.
        assert_eq!(config.flap_window_secs, DEFAULT_FLAP_WINDOW_SECS);
        assert_eq!(config.sweep_interval_ms, DEFAULT_SWEEP_INTERVAL_MS);
        assert!(!config.suppress_flapping);
    }

    #[test]
    fn init_buffer_longer_than_cache_ttl_is_fatal() {
        let err = BufferConfig::from_json(
            r#"{"message_cache_ttl_in_seconds": 10, "message_init_buffer_ttl_in_seconds": 11}"#,
        )
        .expect_err("ordering violated");
        assert!(matches!(
            err,
            ConfigError::InitBufferExceedsCacheTtl {
                init_buffer_ttl_secs: 11,
                cache_ttl_secs: 10
            }
        ));
    }

    #[test]
    fn equal_ttls_are_allowed() {
        let config = BufferConfig {
            cache_ttl_secs: 30,
            init_buffer_ttl_secs: 30,
            ..BufferConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_values_rejected() {
        let zero_queue = BufferConfig {
            gateway_queue_capacity: 0,
            ..BufferConfig::default()
        };
        assert!(matches!(
            zero_queue.validate(),
            Err(ConfigError::ZeroQueueCapacity)
        ));

        let zero_threshold = BufferConfig {
            flap_count_threshold: 0,
            ..BufferConfig::default()
        };
        assert!(matches!(
            zero_threshold.validate(),
            Err(ConfigError::ZeroFlapThreshold)
        ));

        let zero_window = BufferConfig {
            flap_window_secs: 0,
            ..BufferConfig::default()
        };
        assert!(matches!(
            zero_window.validate(),
            Err(ConfigError::ZeroFlapWindow)
        ));

        let zero_sweep = BufferConfig {
            sweep_interval_ms: 0,
            ..BufferConfig::default()
        };
        assert!(matches!(
            zero_sweep.validate(),
            Err(ConfigError::ZeroSweepInterval)
        ));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(
            BufferConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = BufferConfig::load("/nonexistent/nscabuf/conf.json").expect_err("no such file");
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/nscabuf/conf.json"));
    }

    #[test]
    fn durations_follow_fields() {
        let config = BufferConfig {
            cache_ttl_secs: 90,
            init_buffer_ttl_secs: 15,
            sweep_interval_ms: 250,
            compact_interval_secs: 5,
            ..BufferConfig::default()
        };
        assert_eq!(config.cache_ttl(), TimeDelta::seconds(90));
        assert_eq!(config.init_buffer_ttl(), TimeDelta::seconds(15));
        assert_eq!(config.sweep_interval(), Duration::from_millis(250));
        assert_eq!(config.compact_interval(), Duration::from_secs(5));
    }

    #[test]
    fn oversized_values_rejected() {
        let err = BufferConfig::from_json(r#"{"flap_window_in_seconds": 4611686018427387904}"#)
            .expect_err("window too large");
        assert!(matches!(
            err,
            ConfigError::TooLarge {
                key: "flap_window_in_seconds",
                max: MAX_FLAP_WINDOW_SECS,
                ..
            }
        ));
        assert!(err.to_string().contains("flap_window_in_seconds"));

        let long_sweep = BufferConfig {
            sweep_interval_ms: MAX_SWEEP_INTERVAL_MS + 1,
            ..BufferConfig::default()
        };
        assert!(matches!(
            long_sweep.validate(),
            Err(ConfigError::TooLarge { key: "sweep_interval_ms", .. })
        ));

        let long_compact = BufferConfig {
            compact_interval_secs: MAX_COMPACT_INTERVAL_SECS + 1,
            ..BufferConfig::default()
        };
        assert!(matches!(
            long_compact.validate(),
            Err(ConfigError::TooLarge { key: "compact_interval_in_seconds", .. })
        ));

        let huge_queue = BufferConfig {
            gateway_queue_capacity: MAX_QUEUE_CAPACITY + 1,
            ..BufferConfig::default()
        };
        assert!(matches!(
            huge_queue.validate(),
            Err(ConfigError::TooLarge { key: "gateway_message_buffer_size", .. })
        ));
    }

    #[test]
    fn limits_themselves_are_allowed() {
        let config = BufferConfig {
            gateway_queue_capacity: MAX_QUEUE_CAPACITY,
            flap_window_secs: MAX_FLAP_WINDOW_SECS,
            sweep_interval_ms: MAX_SWEEP_INTERVAL_MS,
            compact_interval_secs: MAX_COMPACT_INTERVAL_SECS,
            ..BufferConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
