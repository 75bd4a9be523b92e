/// Least-squares trend fitting over a sample series
pub mod trend;

/// Periodic multi-horizon forecasting per service and metric
pub mod trend_predictor;

pub use trend::TrendFit;
pub use trend_predictor::{recommendation, Prediction, Predictor};
