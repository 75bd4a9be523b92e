use serde::{Deserialize, Serialize};

/// Smallest magnitude used when normalizing the fit error by the series mean
const MEAN_FLOOR: f64 = 1e-3;

/// Ordinary least-squares line through a series, indexed by sample position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrendFit {
    /// Change in value per sample
    pub slope: f64,
    /// Mean of the fitted values
    pub mean: f64,
    /// Mean of the sample indices
    pub index_mean: f64,
    /// Root-mean-square error of the fit
    pub rmse: f64,
    pub points: usize,
}

impl TrendFit {
    /// Fit a line through `values`, treating sample `i` as x = i
    ///
    /// Returns `None` with fewer than two points or any non-finite value.
    pub fn fit(values: &[f64]) -> Option<Self> {
        let n = values.len();
        if n < 2 || values.iter().any(|v| !v.is_finite()) {
            return None;
        }

        // Centering the indices keeps the normal equations well conditioned
        // for long series.
        let index_mean = (n - 1) as f64 / 2.0;
        let mean = values.iter().sum::<f64>() / n as f64;

        let (mut sxy, mut sxx) = (0.0, 0.0);
        for (i, value) in values.iter().enumerate() {
            let dx = i as f64 - index_mean;
            sxy += dx * (value - mean);
            sxx += dx * dx;
        }
        let slope = sxy / sxx;

        let mut fit = Self {
            slope,
            mean,
            index_mean,
            rmse: 0.0,
            points: n,
        };

        let squared_error: f64 = values
            .iter()
            .enumerate()
            .map(|(i, value)| (value - fit.value_at(i as f64)).powi(2))
            .sum();
        fit.rmse = (squared_error / n as f64).sqrt();

        Some(fit)
    }

    /// Fitted value at a (possibly fractional or future) sample index
    pub fn value_at(&self, index: f64) -> f64 {
        self.mean + self.slope * (index - self.index_mean)
    }

    /// Fitted value `steps` samples past the last point
    pub fn extrapolate(&self, steps: f64) -> f64 {
        self.value_at((self.points - 1) as f64 + steps)
    }

    /// Fit quality in `[0, 1]`; 1 for a perfect line
    pub fn confidence(&self) -> f64 {
        let relative_error = self.rmse / self.mean.abs().max(MEAN_FLOOR);
        (1.0 / (1.0 + relative_error)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_few_points() {
        assert!(TrendFit::fit(&[]).is_none());
        assert!(TrendFit::fit(&[1.0]).is_none());
        assert!(TrendFit::fit(&[1.0, f64::NAN, 3.0]).is_none());
    }

    #[test]
    fn test_perfect_line() {
        let values: Vec<f64> = (0..30).map(|i| 50.0 + i as f64).collect();
        let fit = TrendFit::fit(&values).unwrap();

        assert!((fit.slope - 1.0).abs() < 1e-9);
        assert!(fit.rmse < 1e-9);
        assert!((fit.confidence() - 1.0).abs() < 1e-9);
        assert!((fit.extrapolate(5.0) - 84.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_series() {
        let fit = TrendFit::fit(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.extrapolate(10.0), 0.0);
        assert_eq!(fit.confidence(), 1.0);
    }

    #[test]
    fn test_noise_lowers_confidence() {
        let clean: Vec<f64> = (0..20).map(|i| 10.0 + i as f64).collect();
        let noisy: Vec<f64> = clean
            .iter()
            .enumerate()
            .map(|(i, v)| if i % 2 == 0 { v + 5.0 } else { v - 5.0 })
            .collect();

        let clean_fit = TrendFit::fit(&clean).unwrap();
        let noisy_fit = TrendFit::fit(&noisy).unwrap();
        assert!(noisy_fit.confidence() < clean_fit.confidence());
        assert!(noisy_fit.confidence() > 0.0);
    }

    #[test]
    fn test_large_offsets_stay_accurate() {
        let values: Vec<f64> = (0..1000).map(|i| 1e9 + 2.0 * i as f64).collect();
        let fit = TrendFit::fit(&values).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-6);
    }
}
