//! Configuration for storage backends and garbage collection.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `shard_amount` | 32 |
//! | `gc.interval` | 60 s |
//! | `gc.percentage` | 2 |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use signurl_storage::{GcConfig, StorageConfig};
//!
//! let config = StorageConfig::builder()
//!     .shard_amount(64)
//!     .gc(GcConfig::builder().interval(Duration::from_secs(30)).build())
//!     .build();
//! assert!(config.validate().is_ok());
//! ```
//!
//! Durations deserialize from humantime strings:
//!
//! ```
//! use signurl_storage::StorageConfig;
//!
//! let config: StorageConfig =
//!     serde_json::from_str(r#"{ "shard_amount": 16, "gc": { "interval": "5m" } }"#).unwrap();
//! assert_eq!(config.gc.interval.as_secs(), 300);
//! assert_eq!(config.gc.percentage, 2);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of shards in [`MemoryStorage`](crate::MemoryStorage).
pub const DEFAULT_SHARD_AMOUNT: usize = 32;

/// Default interval between background sweeps.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest interval accepted between background sweeps.
pub const MIN_GC_INTERVAL: Duration = Duration::from_millis(1);

/// Default probability (in percent) that a request triggers a sweep.
pub const DEFAULT_GC_PERCENTAGE: u8 = 2;

/// Backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Number of independently locked shards. Must be a power of two, at least 2.
    #[serde(default = "default_shard_amount")]
    #[builder(default = default_shard_amount())]
    pub shard_amount: usize,

    /// Garbage collection scheduling.
    #[serde(default)]
    #[builder(default)]
    pub gc: GcConfig,
}

/// Garbage collection scheduling.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcConfig {
    /// Interval between background sweeps.
    #[serde(with = "humantime_serde", default = "default_gc_interval")]
    #[builder(default = default_gc_interval())]
    pub interval: Duration,

    /// Chance, in percent, that a single request triggers an inline sweep.
    #[serde(default = "default_gc_percentage")]
    #[builder(default = default_gc_percentage())]
    pub percentage: u8,
}

fn default_shard_amount() -> usize {
    DEFAULT_SHARD_AMOUNT
}

fn default_gc_interval() -> Duration {
    DEFAULT_GC_INTERVAL
}

fn default_gc_percentage() -> u8 {
    DEFAULT_GC_PERCENTAGE
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { shard_amount: default_shard_amount(), gc: GcConfig::default() }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { interval: default_gc_interval(), percentage: default_gc_percentage() }
    }
}

impl StorageConfig {
    /// Checks every field against its constraints.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found, naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_amount < 2 {
            return Err(ConfigError::BelowMinimum {
                field: "shard_amount",
                min: "2".into(),
                value: self.shard_amount.to_string(),
            });
        }
        if !self.shard_amount.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "shard_amount",
                reason: format!("{} is not a power of two", self.shard_amount),
            });
        }
        self.gc.validate()
    }
}

impl GcConfig {
    /// Checks every field against its constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the interval is below [`MIN_GC_INTERVAL`]
    /// or the percentage exceeds 100.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval < MIN_GC_INTERVAL {
            return Err(ConfigError::BelowMinimum {
                field: "gc.interval",
                min: format!("{MIN_GC_INTERVAL:?}"),
                value: format!("{:?}", self.interval),
            });
        }
        validate_percentage(self.percentage)
    }
}

pub(crate) fn validate_percentage(percentage: u8) -> Result<(), ConfigError> {
    if percentage > 100 {
        return Err(ConfigError::AboveMaximum {
            field: "gc.percentage",
            max: "100".into(),
            value: percentage.to_string(),
        });
    }
    Ok(())
}
