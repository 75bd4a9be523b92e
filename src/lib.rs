/// Error types for the analytics pipeline
pub mod error;

/// Event, snapshot and classification types shared by every component
pub mod events;

/// Configuration management
pub mod config;

/// Background cycle workers
pub mod scheduler;

/// Buffered event intake and the event store it flushes into
pub mod collectors;

/// Windowed aggregation of events and metrics
pub mod aggregator;

/// Baseline anomaly detection
pub mod anomaly;

/// Trend-based metric forecasting
pub mod predictor;

/// Pipeline facade and dashboard
pub mod service;

// Re-export commonly used types
pub use config::Config;
pub use error::{AnalyticsError, ConfigError};
pub use events::{AnalyticsEvent, MetricName, MetricsSnapshot, Severity, SystemHealth};
pub use service::{AnalyticsService, Dashboard};
