use std::time::Duration;
use thiserror::Error;

/// Errors returned by the analytics pipeline
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Analytics pipeline is closed")]
    Closed,

    #[error("Failed to spawn worker '{name}': {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker '{0}' panicked before it could be joined")]
    WorkerJoin(String),

    #[error("Shutdown took {elapsed:?}, exceeding the grace period of {grace:?}")]
    ShutdownTimedOut { elapsed: Duration, grace: Duration },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
