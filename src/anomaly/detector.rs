use crate::anomaly::baseline::Baseline;
use crate::config::AnomalyConfig;
use crate::error::AnalyticsError;
use crate::events::{MetricName, MetricsSnapshot, Severity, Timestamp};
use crate::scheduler::{lock, CycleWorker};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A sample that strayed beyond the detection threshold
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyRecord {
    pub id: String,
    /// When the anomalous sample was observed
    pub timestamp: Timestamp,
    pub service_id: String,
    pub metric_name: MetricName,
    pub observed_value: f64,
    pub baseline_mean: f64,
    pub baseline_std_dev: f64,
    /// Distance from the mean in (floored) standard deviations
    pub score: f64,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Copy)]
struct PendingSample {
    value: f64,
    timestamp: Timestamp,
}

/// Detection state of one (service, metric) series
#[derive(Debug, Default)]
struct SeriesState {
    history: VecDeque<f64>,
    pending: Vec<PendingSample>,
    baseline: Option<Baseline>,
}

#[derive(Debug)]
struct DetectorState {
    series: BTreeMap<(String, MetricName), SeriesState>,
    /// Anomalies per service, oldest first
    anomalies: HashMap<String, VecDeque<AnomalyRecord>>,
    config: AnomalyConfig,
}

impl DetectorState {
    fn record(&mut self, snapshot: &MetricsSnapshot) {
        let max_history = self.config.max_history;

        for name in MetricName::ALL {
            let value = name.value_of(snapshot);
            if !value.is_finite() {
                debug!(
                    "Ignoring non-finite {} for {}: {}",
                    name, snapshot.service_id, value
                );
                continue;
            }

            let series = self
                .series
                .entry((snapshot.service_id.clone(), name))
                .or_default();
            series.pending.push(PendingSample {
                value,
                timestamp: snapshot.timestamp,
            });
            series.history.push_back(value);
            while series.history.len() > max_history {
                series.history.pop_front();
            }
        }
    }

    /// Run one detection cycle, returning the number of anomalies emitted
    fn detect(&mut self) -> usize {
        let threshold = self.config.threshold;
        let critical_multiplier = self.config.critical_multiplier;
        let min_baseline_samples = self.config.min_baseline_samples;
        let mut found = Vec::new();

        for ((service_id, metric_name), series) in self.series.iter_mut() {
            let Some(baseline) = &series.baseline else {
                // The first cycle for a series only establishes its baseline.
                if series.history.len() < min_baseline_samples {
                    continue;
                }
                series.baseline = Baseline::from_values(&series.history);
                series.pending.clear();
                debug!(
                    "Established baseline for {}/{} from {} samples",
                    service_id,
                    metric_name,
                    series.history.len()
                );
                continue;
            };

            if series.pending.is_empty() {
                continue;
            }

            for sample in &series.pending {
                let Some((score, severity)) =
                    baseline.classify(sample.value, threshold, critical_multiplier)
                else {
                    continue;
                };

                found.push(AnomalyRecord {
                    id: Uuid::new_v4().to_string(),
                    timestamp: sample.timestamp,
                    service_id: service_id.clone(),
                    metric_name: *metric_name,
                    observed_value: sample.value,
                    baseline_mean: baseline.mean,
                    baseline_std_dev: baseline.std_dev,
                    score,
                    severity,
                    description: format!(
                        "{} is {:.2} standard deviations from baseline",
                        metric_name, score
                    ),
                });
            }

            // Rolling update: the next cycle scores against recent history.
            series.baseline = Baseline::from_values(&series.history);
            series.pending.clear();
        }

        let emitted = found.len();
        for record in found {
            warn!(
                "Anomaly detected for {}: {} (observed {:.3}, severity {:?})",
                record.service_id, record.description, record.observed_value, record.severity
            );
            let history = self
                .anomalies
                .entry(record.service_id.clone())
                .or_default();
            history.push_back(record);
            while history.len() > self.config.retention {
                history.pop_front();
            }
        }

        emitted
    }
}

/// Rolling-baseline anomaly detector over metric snapshots
///
/// Detection is a two-phase protocol per series: the first cycle that sees
/// enough history only freezes a baseline, and later cycles score the samples
/// recorded since the previous cycle against it before rolling it forward.
pub struct AnomalyDetector {
    state: Arc<Mutex<DetectorState>>,
    worker: Mutex<Option<CycleWorker>>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(DetectorState {
                series: BTreeMap::new(),
                anomalies: HashMap::new(),
                config,
            })),
            worker: Mutex::new(None),
        }
    }

    /// Start the background detection worker
    pub fn start(&self) -> Result<(), AnalyticsError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let interval = lock(&self.state).config.interval();
        let state = Arc::clone(&self.state);
        let started = CycleWorker::spawn("anomaly-detector", interval, move || {
            let emitted = lock(&state).detect();
            debug!("Scheduled detection emitted {} anomalies", emitted);
        })?;

        info!(
            "AnomalyDetector started worker '{}' with interval {:?}",
            started.name(),
            started.interval()
        );
        *worker = Some(started);
        Ok(())
    }

    /// Stop the background worker, letting an in-flight cycle finish
    pub fn stop(&self) -> Result<(), AnalyticsError> {
        if let Some(mut worker) = lock(&self.worker).take() {
            worker.stop()?;
            info!("AnomalyDetector stopped");
        }
        Ok(())
    }

    /// Queue a snapshot's values for the next cycle and add them to history
    pub fn record_metric(&self, snapshot: &MetricsSnapshot) {
        lock(&self.state).record(snapshot);
    }

    /// Run one detection cycle now, returning the number of anomalies emitted
    ///
    /// Shares the serialized cycle path with the background worker.
    pub fn detect_anomalies_now(&self) -> usize {
        lock(&self.state).detect()
    }

    /// Most recent anomalies for a service, newest first
    pub fn get_anomalies(&self, service_id: &str, limit: usize) -> Vec<AnomalyRecord> {
        lock(&self.state)
            .anomalies
            .get(service_id)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent anomalies across all services, newest first
    pub fn get_all_anomalies(&self, limit: usize) -> Vec<AnomalyRecord> {
        let state = lock(&self.state);
        let mut all: Vec<AnomalyRecord> = state
            .anomalies
            .values()
            .flat_map(|history| history.iter().rev().take(limit).cloned())
            .collect();
        drop(state);

        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit);
        all
    }

    /// Current frozen baseline for a series, if one has been established
    pub fn baseline(&self, service_id: &str, metric_name: MetricName) -> Option<Baseline> {
        lock(&self.state)
            .series
            .get(&(service_id.to_string(), metric_name))
            .and_then(|series| series.baseline.clone())
    }

    /// Samples recorded since the last cycle, across all series
    pub fn pending_samples(&self) -> usize {
        lock(&self.state)
            .series
            .values()
            .map(|series| series.pending.len())
            .sum()
    }
}

impl Drop for AnomalyDetector {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping anomaly detector on drop: {}", e);
        }
    }
}
