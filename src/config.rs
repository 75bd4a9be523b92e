//! Construction-time configuration for the analytics pipeline
//!
//! Every section and field has a default, so an empty TOML document is a
//! valid configuration. Intervals are given in milliseconds so tests and
//! low-latency deployments can run cycles well under a second.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub collector: CollectorConfig,
    pub aggregator: AggregatorConfig,
    pub anomaly: AnomalyConfig,
    pub predictor: PredictorConfig,
    pub health: HealthConfig,
    pub shutdown: ShutdownConfig,
}

/// Longest event store retention accepted: ten years
pub const MAX_STORE_AGE_SECONDS: u64 = 10 * 365 * 24 * 3_600;

/// Event collector and event store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    /// Capacity of the intake queue; events beyond it are dropped
    pub buffer_capacity: usize,
    pub flush_interval_ms: u64,
    /// Maximum number of events kept in the event store
    pub store_max_events: usize,
    /// Events older than this are evicted from the event store
    pub store_max_age_seconds: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            flush_interval_ms: 5_000,
            store_max_events: 10_000,
            store_max_age_seconds: 3_600,
        }
    }
}

impl CollectorConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn store_max_age(&self) -> chrono::Duration {
        let seconds = self.store_max_age_seconds.min(MAX_STORE_AGE_SECONDS);
        chrono::Duration::seconds(seconds as i64)
    }
}

/// Windowed aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregatorConfig {
    pub interval_ms: u64,
    /// Aggregation records kept per service
    pub retention: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            retention: 1_000,
        }
    }
}

impl AggregatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Anomaly detection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnomalyConfig {
    pub interval_ms: u64,
    /// Standard deviations a sample may stray before it is anomalous
    pub threshold: f64,
    /// Standard deviations at which an anomaly becomes critical
    pub critical_multiplier: f64,
    /// Values kept per service and metric for baseline computation
    pub max_history: usize,
    /// Values needed before a first baseline is established
    pub min_baseline_samples: usize,
    /// Anomaly records kept per service
    pub retention: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            threshold: 2.0,
            critical_multiplier: 3.0,
            max_history: 1_000,
            min_baseline_samples: 2,
            retention: 1_000,
        }
    }
}

impl AnomalyConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Trend prediction settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PredictorConfig {
    pub interval_ms: u64,
    /// Forecast horizons, nearest first
    pub horizons_seconds: Vec<u64>,
    /// Expected spacing between snapshots, used to turn horizons into steps
    pub sample_interval_seconds: u64,
    /// Points a series needs before it is fitted
    pub min_points: usize,
    /// Points kept per service and metric
    pub max_series_len: usize,
    /// Predictions kept per service
    pub retention: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            horizons_seconds: vec![300, 900, 3_600],
            sample_interval_seconds: 60,
            min_points: 2,
            max_series_len: 1_000,
            retention: 1_000,
        }
    }
}

impl PredictorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn horizons(&self) -> Vec<Duration> {
        self.horizons_seconds
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_seconds)
    }
}

/// Dashboard health classification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Average error rate above which a service is at least `warning`
    pub error_rate_warning: f64,
    /// Most recent anomalies considered when classifying health
    pub anomaly_lookback: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            error_rate_warning: 0.05,
            anomaly_lookback: 10,
        }
    }
}

/// Shutdown settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 5_000,
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema, and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn require(condition: bool, message: &str) -> Result<(), ConfigError> {
            if condition {
                Ok(())
            } else {
                Err(ConfigError::ValidationError(message.to_string()))
            }
        }

        require(
            self.collector.buffer_capacity > 0,
            "collector.buffer_capacity must be greater than 0",
        )?;
        require(
            self.collector.flush_interval_ms > 0,
            "collector.flush_interval_ms must be greater than 0",
        )?;
        require(
            self.collector.store_max_events > 0,
            "collector.store_max_events must be greater than 0",
        )?;
        require(
            self.collector.store_max_age_seconds > 0
                && self.collector.store_max_age_seconds <= MAX_STORE_AGE_SECONDS,
            "collector.store_max_age_seconds must be between 1 and ten years",
        )?;
        require(
            self.aggregator.interval_ms > 0,
            "aggregator.interval_ms must be greater than 0",
        )?;
        require(
            self.aggregator.retention > 0,
            "aggregator.retention must be greater than 0",
        )?;
        require(
            self.anomaly.interval_ms > 0,
            "anomaly.interval_ms must be greater than 0",
        )?;
        require(
            self.anomaly.threshold.is_finite() && self.anomaly.threshold > 0.0,
            "anomaly.threshold must be a positive number",
        )?;
        require(
            self.anomaly.critical_multiplier.is_finite()
                && self.anomaly.critical_multiplier >= self.anomaly.threshold,
            "anomaly.critical_multiplier must be at least anomaly.threshold",
        )?;
        require(
            self.anomaly.max_history > 0,
            "anomaly.max_history must be greater than 0",
        )?;
        require(
            self.anomaly.min_baseline_samples > 0
                && self.anomaly.min_baseline_samples <= self.anomaly.max_history,
            "anomaly.min_baseline_samples must be between 1 and anomaly.max_history",
        )?;
        require(
            self.anomaly.retention > 0,
            "anomaly.retention must be greater than 0",
        )?;
        require(
            self.predictor.interval_ms > 0,
            "predictor.interval_ms must be greater than 0",
        )?;
        require(
            !self.predictor.horizons_seconds.is_empty(),
            "predictor.horizons_seconds must not be empty",
        )?;
        require(
            self.predictor.sample_interval_seconds > 0,
            "predictor.sample_interval_seconds must be greater than 0",
        )?;
        require(
            self.predictor.min_points >= 2,
            "predictor.min_points must be at least 2",
        )?;
        require(
            self.predictor.max_series_len >= self.predictor.min_points,
            "predictor.max_series_len must be at least predictor.min_points",
        )?;
        require(
            self.predictor.retention > 0,
            "predictor.retention must be greater than 0",
        )?;
        require(
            (0.0..=1.0).contains(&self.health.error_rate_warning),
            "health.error_rate_warning must be between 0 and 1",
        )?;
        Ok(())
    }
}
