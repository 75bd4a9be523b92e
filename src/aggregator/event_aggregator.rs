//! Windowed aggregation of events and metric samples
//!
//! Samples accumulate per `(service, metric)` key in an open window. Each
//! aggregation cycle closes the window, appends one [`Aggregation`] per key
//! that saw samples to that service's bounded history, and opens a new window.

use crate::error::AnalyticsError;
use crate::events::{AnalyticsEvent, MetricName, MetricsSnapshot, Timestamp};
use crate::scheduler::{lock, CycleWorker};
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Statistical summary of one key over one closed window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Aggregation {
    pub service_id: String,
    /// Snapshot metric name or event type
    pub metric_name: String,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Aggregation {
    /// Summarize a window's samples; `None` when there are none
    ///
    /// Sorts `samples` in place.
    pub fn from_samples(
        service_id: &str,
        metric_name: &str,
        window_start: Timestamp,
        window_end: Timestamp,
        samples: &mut [f64],
    ) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        samples.sort_by(f64::total_cmp);
        let count = samples.len();
        let sum: f64 = samples.iter().sum();
        let min = samples[0];
        let max = samples[count - 1];
        // Rounding in the sum can push the mean a hair outside [min, max].
        let avg = (sum / count as f64).clamp(min, max);

        Some(Self {
            service_id: service_id.to_string(),
            metric_name: metric_name.to_string(),
            window_start,
            window_end,
            count: count as u64,
            sum,
            avg,
            min,
            max,
            p50: percentile(samples, 50.0),
            p95: percentile(samples, 95.0),
            p99: percentile(samples, 99.0),
        })
    }
}

/// Nearest-rank percentile of sorted, non-empty data
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug)]
struct AggregatorState {
    /// Open window, keyed by (service, metric)
    buckets: BTreeMap<(String, String), Vec<f64>>,
    /// Closed windows per service, oldest first
    history: HashMap<String, VecDeque<Aggregation>>,
    window_start: Timestamp,
    retention: usize,
}

impl AggregatorState {
    fn add_sample(&mut self, service_id: &str, metric_name: &str, value: f64) {
        if !value.is_finite() {
            debug!(
                "Ignoring non-finite sample for {}/{}: {}",
                service_id, metric_name, value
            );
            return;
        }

        self.buckets
            .entry((service_id.to_string(), metric_name.to_string()))
            .or_default()
            .push(value);
    }

    /// Close the open window, returning the number of records produced
    fn aggregate(&mut self) -> usize {
        let window_end = Utc::now();
        let window_start = std::mem::replace(&mut self.window_start, window_end);
        let buckets = std::mem::take(&mut self.buckets);
        let mut produced = 0;

        for ((service_id, metric_name), mut samples) in buckets {
            let Some(aggregation) = Aggregation::from_samples(
                &service_id,
                &metric_name,
                window_start,
                window_end,
                &mut samples,
            ) else {
                continue;
            };

            let history = self.history.entry(service_id).or_default();
            history.push_back(aggregation);
            while history.len() > self.retention {
                history.pop_front();
            }
            produced += 1;
        }

        produced
    }
}

/// Windowed aggregator for events and metric snapshots
pub struct Aggregator {
    state: Arc<Mutex<AggregatorState>>,
    interval: Duration,
    worker: Mutex<Option<CycleWorker>>,
}

impl Aggregator {
    /// Create an aggregator closing windows every `interval`
    ///
    /// # Arguments
    ///
    /// * `interval` - Window length used by the background worker
    /// * `retention` - Aggregation records kept per service
    pub fn new(interval: Duration, retention: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(AggregatorState {
                buckets: BTreeMap::new(),
                history: HashMap::new(),
                window_start: Utc::now(),
                retention,
            })),
            interval,
            worker: Mutex::new(None),
        }
    }

    /// Start the background aggregation worker
    pub fn start(&self) -> Result<(), AnalyticsError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let started = CycleWorker::spawn("aggregator", self.interval, move || {
            let produced = lock(&state).aggregate();
            debug!("Scheduled aggregation produced {} records", produced);
        })?;

        info!(
            "Aggregator started worker '{}' with window interval {:?}",
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
            info!("Aggregator stopped");
        }
        Ok(())
    }

    /// Accumulate an event keyed by its type
    ///
    /// The sample is the payload's numeric `value` entry, or `1.0` when the
    /// event only counts an occurrence.
    pub fn add_event(&self, event: &AnalyticsEvent) {
        let value = event.numeric_value().unwrap_or(1.0);
        lock(&self.state).add_sample(&event.service_id, &event.event_type, value);
    }

    /// Accumulate one sample per metric carried by the snapshot
    pub fn add_metrics(&self, snapshot: &MetricsSnapshot) {
        let mut state = lock(&self.state);
        for name in MetricName::ALL {
            state.add_sample(&snapshot.service_id, name.as_str(), name.value_of(snapshot));
        }
    }

    /// Close the current window now
    ///
    /// Runs on the same serialized path as the background worker. A window
    /// without samples produces no records. Returns the number of records
    /// appended.
    pub fn aggregate_now(&self) -> usize {
        let produced = lock(&self.state).aggregate();
        debug!("Aggregation produced {} records", produced);
        produced
    }

    /// Aggregation history for a service, most recent last
    pub fn get_aggregations(&self, service_id: &str) -> Vec<Aggregation> {
        lock(&self.state)
            .history
            .get(service_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent aggregation of one metric for a service
    pub fn latest_aggregation(&self, service_id: &str, metric_name: &str) -> Option<Aggregation> {
        lock(&self.state)
            .history
            .get(service_id)?
            .iter()
            .rev()
            .find(|aggregation| aggregation.metric_name == metric_name)
            .cloned()
    }

    /// Services with at least one aggregation record, sorted
    pub fn services(&self) -> Vec<String> {
        let state = lock(&self.state);
        let mut services: Vec<String> = state.history.keys().cloned().collect();
        services.sort();
        services
    }

    /// Samples waiting in the open window
    pub fn pending_samples(&self) -> usize {
        lock(&self.state).buckets.values().map(Vec::len).sum()
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Error stopping aggregator on drop: {}", e);
        }
    }
}
