use crate::config::PredictorConfig;
use crate::error::AnalyticsError;
use crate::events::{MetricName, MetricsSnapshot, Timestamp};
use crate::predictor::trend::TrendFit;
use crate::scheduler::{lock, CycleWorker};
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Forecast of one metric at one horizon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub id: String,
    pub timestamp: Timestamp,
    pub service_id: String,
    pub metric_name: MetricName,
    #[serde(with = "duration_secs")]
    pub horizon: Duration,
    pub predicted_value: f64,
    pub confidence: f64,
    pub recommendation: String,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Operator hint for a forecast relative to the last observed value
pub fn recommendation(metric_name: MetricName, predicted: f64, current: f64) -> &'static str {
    let change = (predicted - current) / (current.abs() + 1e-3) * 100.0;

    match metric_name {
        MetricName::CpuUsage if change > 20.0 => {
            "Consider scaling up - CPU usage expected to increase significantly"
        }
        MetricName::CpuUsage if change < -20.0 => {
            "Consider scaling down - CPU usage expected to decrease"
        }
        MetricName::CpuUsage => "CPU usage expected to remain stable",
        MetricName::MemoryUsage if change > 20.0 => {
            "Monitor memory usage - expected to increase significantly"
        }
        MetricName::MemoryUsage if change < -20.0 => "Memory usage expected to decrease",
        MetricName::MemoryUsage => "Memory usage expected to remain stable",
        MetricName::ErrorRate if change > 10.0 => {
            "Error rate expected to increase - investigate potential issues"
        }
        MetricName::ErrorRate if change < -10.0 => "Error rate expected to improve",
        MetricName::ErrorRate => "Error rate expected to remain stable",
        MetricName::RequestRate if change > 30.0 => {
            "High traffic expected - ensure sufficient capacity"
        }
        MetricName::RequestRate if change < -30.0 => "Lower traffic expected",
        MetricName::RequestRate => "Request rate expected to remain stable",
        _ => "No specific recommendation",
    }
}

#[derive(Debug)]
struct PredictorState {
    series: BTreeMap<(String, MetricName), VecDeque<f64>>,
    /// Most recent fit per series
    fits: HashMap<(String, MetricName), TrendFit>,
    /// Predictions per service, oldest first
    predictions: HashMap<String, VecDeque<Prediction>>,
    config: PredictorConfig,
}

impl PredictorState {
    fn record(&mut self, snapshot: &MetricsSnapshot) {
        let max_len = self.config.max_series_len;

        for name in MetricName::ALL {
            let value = name.value_of(snapshot);
            if !value.is_finite() {
                continue;
            }

            let series = self
                .series
                .entry((snapshot.service_id.clone(), name))
                .or_default();
            series.push_back(value);
            while series.len() > max_len {
                series.pop_front();
            }
        }
    }

    /// Horizon expressed in sample steps past the last point, at least one
    fn steps(&self, horizon: Duration) -> f64 {
        let spacing = self.config.sample_interval().as_secs_f64();
        if spacing <= 0.0 {
            return 1.0;
        }
        (horizon.as_secs_f64() / spacing).max(1.0)
    }

    /// Fit every series and forecast each horizon, returning the number of
    /// predictions appended
    fn predict(&mut self) -> usize {
        let horizons = self.config.horizons();
        let now = Utc::now();
        let mut made = Vec::new();

        for ((service_id, metric_name), series) in &self.series {
            if series.len() < self.config.min_points {
                continue;
            }

            let values: Vec<f64> = series.iter().copied().collect();
            let Some(fit) = TrendFit::fit(&values) else {
                continue;
            };
            let current = values[values.len() - 1];
            let confidence = fit.confidence();

            for horizon in &horizons {
                let predicted_value = fit.extrapolate(self.steps(*horizon)).max(0.0);
                made.push(Prediction {
                    id: Uuid::new_v4().to_string(),
                    timestamp: now,
                    service_id: service_id.clone(),
                    metric_name: *metric_name,
                    horizon: *horizon,
                    predicted_value,
                    confidence,
                    recommendation: recommendation(*metric_name, predicted_value, current)
                        .to_string(),
                });
            }

            self.fits.insert((service_id.clone(), *metric_name), fit);
        }

        let count = made.len();
        for prediction in made {
            let history = self
                .predictions
                .entry(prediction.service_id.clone())
                .or_default();
            history.push_back(prediction);
            while history.len() > self.config.retention {
                history.pop_front();
            }
        }

        count
    }
}

/// Linear-trend forecaster over metric snapshots
pub struct Predictor {
    state: Arc<Mutex<PredictorState>>,
    worker: Mutex<Option<CycleWorker>>,
}

impl Predictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(PredictorState {
                series: BTreeMap::new(),
                fits: HashMap::new(),
                predictions: HashMap::new(),
                config,
            })),
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), AnalyticsError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let interval = lock(&self.state).config.interval();
        let state = Arc::clone(&self.state);
        let started = CycleWorker::spawn("predictor", interval, move || {
            let made = lock(&state).predict();
            debug!("Scheduled prediction produced {} forecasts", made);
        })?;

        info!(
            "Predictor started worker '{}' with interval {:?}",
            started.name(),
            started.interval()
        );
        *worker = Some(started);
        Ok(())
    }

    pub fn stop(&self) -> Result<(), AnalyticsError> {
        if let Some(mut worker) = lock(&self.worker).take() {
            worker.stop()?;
            info!("Predictor stopped");
        }
        Ok(())
    }

    /// Append a snapshot's values to their series
    pub fn record_metric(&self, snapshot: &MetricsSnapshot) {
        lock(&self.state).record(snapshot);
    }

    /// Run one prediction cycle now, returning the number of predictions made
    pub fn make_predictions_now(&self) -> usize {
        let made = lock(&self.state).predict();
        debug!("Prediction cycle produced {} forecasts", made);
        made
    }

    /// Most recent predictions for a service, newest first
    pub fn get_predictions(&self, service_id: &str, limit: usize) -> Vec<Prediction> {
        lock(&self.state)
            .predictions
            .get(service_id)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest_prediction(
        &self,
        service_id: &str,
        metric_name: MetricName,
        horizon: Duration,
    ) -> Option<Prediction> {
        lock(&self.state)
            .predictions
            .get(service_id)?
            .iter()
            .rev()
            .find(|p| p.metric_name == metric_name && p.horizon == horizon)
            .cloned()
    }

    /// Most recent fit for a series, if it has been fitted
    pub fn trend(&self, service_id: &str, metric_name: MetricName) -> Option<TrendFit> {
        lock(&self.state)
            .fits
            .get(&(service_id.to_string(), metric_name))
            .copied()
    }
}

impl Drop for Predictor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping predictor on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn snapshot(service_id: &str, cpu: f64) -> MetricsSnapshot {
        MetricsSnapshot::new(service_id, cpu, 60.0, 70.0, 1000.0, 0.01, 100.0, 95.0)
    }

    #[test]
    fn test_rising_cpu_forecast() {
        let predictor = Predictor::new(PredictorConfig::default());
        for i in 0..30 {
            predictor.record_metric(&snapshot("service1", 50.0 + i as f64));
        }

        // Seven metrics, three horizons each
        assert_eq!(predictor.make_predictions_now(), 21);

        let five_minutes = predictor
            .latest_prediction("service1", MetricName::CpuUsage, Duration::from_secs(300))
            .unwrap();
        assert!(five_minutes.predicted_value > 79.0);
        assert!((five_minutes.predicted_value - 84.0).abs() < 1e-6);
        assert!((five_minutes.confidence - 1.0).abs() < 1e-9);
        assert_eq!(
            five_minutes.recommendation,
            "CPU usage expected to remain stable"
        );

        let one_hour = predictor
            .latest_prediction("service1", MetricName::CpuUsage, Duration::from_secs(3600))
            .unwrap();
        assert!((one_hour.predicted_value - 139.0).abs() < 1e-6);
        assert!(one_hour.recommendation.starts_with("Consider scaling up"));
    }

    #[test]
    fn test_insufficient_points_skipped() {
        let predictor = Predictor::new(PredictorConfig::default());
        predictor.record_metric(&snapshot("service1", 50.0));

        assert_eq!(predictor.make_predictions_now(), 0);
        assert!(predictor.get_predictions("service1", 10).is_empty());
        assert!(predictor.trend("service1", MetricName::CpuUsage).is_none());
    }

    #[test]
    fn test_predictions_never_negative() {
        let predictor = Predictor::new(PredictorConfig::default());
        for i in 0..10 {
            predictor.record_metric(&snapshot("service1", 50.0 - 5.0 * i as f64));
        }
        predictor.make_predictions_now();

        let prediction = predictor
            .latest_prediction("service1", MetricName::CpuUsage, Duration::from_secs(3600))
            .unwrap();
        assert_eq!(prediction.predicted_value, 0.0);
    }

    #[test]
    fn test_series_is_bounded() {
        let predictor = Predictor::new(PredictorConfig {
            max_series_len: 5,
            ..PredictorConfig::default()
        });
        // An early outlier that falls out of the window must not skew the fit
        predictor.record_metric(&snapshot("service1", 1000.0));
        for _ in 0..5 {
            predictor.record_metric(&snapshot("service1", 40.0));
        }
        predictor.make_predictions_now();

        let trend = predictor.trend("service1", MetricName::CpuUsage).unwrap();
        assert_eq!(trend.points, 5);
        assert_eq!(trend.slope, 0.0);
    }

    #[test]
    fn test_get_predictions_newest_first_with_limit() {
        let predictor = Predictor::new(PredictorConfig {
            horizons_seconds: vec![300],
            ..PredictorConfig::default()
        });
        for i in 0..3 {
            predictor.record_metric(&snapshot("service1", 10.0 + i as f64));
        }
        predictor.make_predictions_now();
        thread::sleep(Duration::from_millis(5));
        predictor.make_predictions_now();

        let predictions = predictor.get_predictions("service1", 100);
        assert_eq!(predictions.len(), 14);
        assert!(predictions[0].timestamp >= predictions[13].timestamp);
        assert_eq!(predictor.get_predictions("service1", 3).len(), 3);
        assert!(predictor.get_predictions("unknown", 10).is_empty());
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let predictor = Predictor::new(PredictorConfig {
            retention: 10,
            ..PredictorConfig::default()
        });
        for i in 0..3 {
            predictor.record_metric(&snapshot("service1", 10.0 + i as f64));
        }
        predictor.make_predictions_now();
        assert_eq!(predictor.get_predictions("service1", 100).len(), 10);
    }

    #[test]
    fn test_recommendations() {
        assert_eq!(
            recommendation(MetricName::ErrorRate, 0.2, 0.1),
            "Error rate expected to increase - investigate potential issues"
        );
        assert_eq!(
            recommendation(MetricName::RequestRate, 500.0, 1000.0),
            "Lower traffic expected"
        );
        assert_eq!(
            recommendation(MetricName::MemoryUsage, 100.0, 50.0),
            "Monitor memory usage - expected to increase significantly"
        );
        assert_eq!(
            recommendation(MetricName::Latency, 500.0, 100.0),
            "No specific recommendation"
        );
    }

    #[test]
    fn test_prediction_serializes_horizon_as_seconds() {
        let predictor = Predictor::new(PredictorConfig {
            horizons_seconds: vec![900],
            ..PredictorConfig::default()
        });
        predictor.record_metric(&snapshot("service1", 1.0));
        predictor.record_metric(&snapshot("service1", 2.0));
        predictor.make_predictions_now();

        let prediction = predictor
            .latest_prediction("service1", MetricName::CpuUsage, Duration::from_secs(900))
            .unwrap();
        let json = serde_json::to_value(&prediction).unwrap();
        assert_eq!(json["horizon"], 900);
        assert_eq!(json["metric_name"], "cpu_usage");
    }

    #[test]
    fn test_background_worker_predicts() {
        let predictor = Predictor::new(PredictorConfig {
            interval_ms: 20,
            ..PredictorConfig::default()
        });
        for i in 0..5 {
            predictor.record_metric(&snapshot("service1", i as f64));
        }
        predictor.start().unwrap();
        thread::sleep(Duration::from_millis(150));
        predictor.stop().unwrap();

        assert!(!predictor.get_predictions("service1", 10).is_empty());
    }
}
