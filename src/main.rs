use clap::Parser;
use log::{debug, error, info, warn};
use pulse::config::Config;
use pulse::error::ConfigError;
use pulse::service::AnalyticsService;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

/// Flags accepted by the `pulse` binary
#[derive(Parser)]
#[command(
    name = "pulse",
    about = "Real-time analytics pipeline - aggregation, anomaly detection and trend prediction",
    long_about = "Runs the analytics pipeline: buffers incoming events, aggregates metrics over \
                  fixed windows, flags anomalous samples against rolling baselines and forecasts \
                  metric trends, periodically reporting a dashboard for every known service."
)]
struct Cli {
    /// TOML file with pipeline settings; built-in defaults apply when absent
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Pipeline settings in TOML; omitted sections keep their defaults"
    )]
    config: Option<PathBuf>,

    /// Log every cycle and flush at debug level
    #[arg(short, long, help = "Log pipeline cycles at debug level")]
    verbose: bool,

    /// How often a dashboard is logged for each service
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    report_interval: u64,
}

impl Cli {
    /// Reject flag combinations the pipeline cannot run with
    ///
    /// A settings path that does not exist yet is accepted; `load_config`
    /// decides what happens to it.
    fn validate(&self) -> Result<(), String> {
        if self.report_interval == 0 {
            return Err("--report-interval must be at least 1 second".to_string());
        }

        let Some(settings) = self.config.as_deref() else {
            return Ok(());
        };
        if settings.is_dir() {
            return Err(format!(
                "--config points at a directory, expected a TOML file: {}",
                settings.display()
            ));
        }
        if settings.is_file() && settings.extension().map_or(true, |ext| ext != "toml") {
            warn!("Settings file {} is not named *.toml", settings.display());
        }

        Ok(())
    }

    fn config_path_str(&self) -> Result<Option<&str>, String> {
        self.config
            .as_deref()
            .map(|settings| {
                settings.to_str().ok_or_else(|| {
                    format!("--config path is not valid UTF-8: {}", settings.display())
                })
            })
            .transpose()
    }
}

/// Resolve the pipeline settings for this run
///
/// A missing or unreadable file falls back to defaults; an invalid one is an
/// error.
fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            match Config::from_file(std::path::Path::new(path)) {
                Ok(config) => Ok(config),
                Err(ConfigError::ReadError(reason)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable ({}), using defaults",
                        path, reason
                    );
                    Ok(Config::default())
                }
                Err(e) => Err(e),
            }
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}

/// Log a dashboard for every service that has produced aggregations
fn report(service: &AnalyticsService) {
    let services = service.known_services();
    if services.is_empty() {
        debug!("No services reported yet");
        return;
    }

    let stats = service.collector_stats();
    info!(
        "Collector: {} accepted, {} dropped, {} flushed, {} queued",
        stats.accepted, stats.dropped, stats.flushed, stats.queue_depth
    );

    for service_id in services {
        let dashboard = service.get_dashboard_data(&service_id);
        match serde_json::to_string(&dashboard) {
            Ok(json) => info!(
                "Dashboard for '{}' ({}): {}",
                service_id, dashboard.system_health, json
            ),
            Err(e) => error!("Failed to serialize dashboard for '{}': {}", service_id, e),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting analytics pipeline");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let service = match AnalyticsService::launch(config) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to start analytics service: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_sender, shutdown_receiver) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    }) {
        error!("Error setting SIGINT handler: {}", e);
        std::process::exit(1);
    }

    let settings = service.config();
    info!(
        "Analytics pipeline is running (windows every {:?}, detection every {:?}, \
         predictions every {:?}, shutdown grace {:?}). Press Ctrl+C to stop.",
        settings.aggregator.interval(),
        settings.anomaly.interval(),
        settings.predictor.interval(),
        settings.shutdown.grace_period()
    );

    let report_interval = Duration::from_secs(cli.report_interval);
    loop {
        match shutdown_receiver.recv_timeout(report_interval) {
            Err(RecvTimeoutError::Timeout) => report(&service),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Err(e) = service.close() {
        error!("Error during shutdown: {}", e);
        std::process::exit(1);
    }

    report(&service);
    info!("Analytics pipeline shutdown complete");
}
