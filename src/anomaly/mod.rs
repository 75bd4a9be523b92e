/// Frozen baseline statistics and sample scoring
pub mod baseline;

/// Two-phase rolling-baseline anomaly detector
pub mod detector;

pub use baseline::{Baseline, STD_DEV_FLOOR};
pub use detector::{AnomalyDetector, AnomalyRecord};
