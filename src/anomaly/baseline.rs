use crate::events::{Severity, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Smallest standard deviation used when scoring a sample
///
/// A perfectly flat baseline would otherwise divide by zero, and every
/// rounding-level wobble would count as an infinite deviation.
pub const STD_DEV_FLOOR: f64 = 1e-3;

/// Frozen statistics a metric is scored against until the next rolling update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub sample_count: usize,
    pub updated_at: Timestamp,
}

impl Baseline {
    /// Compute a baseline over the given values; `None` when there are none
    pub fn from_values<'a, I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a f64>,
    {
        // Welford's update keeps the variance stable for large, tightly
        // clustered values.
        let mut count = 0usize;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for &value in values {
            count += 1;
            let delta = value - mean;
            mean += delta / count as f64;
            m2 += delta * (value - mean);
            min = min.min(value);
            max = max.max(value);
        }

        if count == 0 {
            return None;
        }

        Some(Self {
            mean,
            std_dev: (m2 / count as f64).max(0.0).sqrt(),
            min,
            max,
            sample_count: count,
            updated_at: Utc::now(),
        })
    }

    /// How many (floored) standard deviations `value` lies from the mean
    pub fn score(&self, value: f64) -> f64 {
        (value - self.mean).abs() / self.std_dev.max(STD_DEV_FLOOR)
    }

    /// Classify a sample against this baseline
    ///
    /// Returns the score and severity when the sample lies more than
    /// `threshold` standard deviations from the mean; severity is critical at
    /// or beyond `critical_multiplier`.
    pub fn classify(
        &self,
        value: f64,
        threshold: f64,
        critical_multiplier: f64,
    ) -> Option<(f64, Severity)> {
        let score = self.score(value);
        if score.is_nan() || score <= threshold {
            return None;
        }

        let severity = if score >= critical_multiplier {
            Severity::Critical
        } else {
            Severity::Warning
        };
        Some((score, severity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values_have_no_baseline() {
        let values: Vec<f64> = Vec::new();
        assert!(Baseline::from_values(&values).is_none());
    }

    #[test]
    fn test_known_statistics() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let baseline = Baseline::from_values(&values).unwrap();
        assert!((baseline.mean - 5.0).abs() < 1e-12);
        assert!((baseline.std_dev - 2.0).abs() < 1e-12);
        assert_eq!(baseline.min, 2.0);
        assert_eq!(baseline.max, 9.0);
        assert_eq!(baseline.sample_count, 8);
    }

    #[test]
    fn test_constant_values_have_zero_std_dev() {
        let values = vec![50.0; 20];
        let baseline = Baseline::from_values(&values).unwrap();
        assert_eq!(baseline.mean, 50.0);
        assert!(baseline.std_dev.abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_only_flags_real_deviation() {
        let baseline = Baseline::from_values(&vec![50.0; 10]).unwrap();
        assert!(baseline.classify(50.0, 2.0, 3.0).is_none());
        assert!(baseline.classify(50.0 + 1e-9, 2.0, 3.0).is_none());

        let (score, severity) = baseline.classify(200.0, 2.0, 3.0).unwrap();
        assert!(score.is_finite());
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn test_severity_buckets() {
        // mean 5, std dev 2
        let baseline =
            Baseline::from_values(&vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();

        assert!(baseline.classify(8.0, 2.0, 3.0).is_none()); // 1.5 sigma
        assert_eq!(
            baseline.classify(10.0, 2.0, 3.0).map(|(_, s)| s),
            Some(Severity::Warning)
        ); // 2.5 sigma
        assert_eq!(
            baseline.classify(-2.0, 2.0, 3.0).map(|(_, s)| s),
            Some(Severity::Critical)
        ); // 3.5 sigma
    }

    #[test]
    fn test_large_offset_values_are_stable() {
        let values: Vec<f64> = (0..1000).map(|i| 1e9 + (i % 2) as f64).collect();
        let baseline = Baseline::from_values(&values).unwrap();
        assert!((baseline.std_dev - 0.5).abs() < 1e-4);
    }
}
