//! Facade that owns the pipeline components and their lifecycle
//!
//! Producers talk only to [`AnalyticsService`]. It routes each record to the
//! components that consume it, exposes the "now" triggers and read queries,
//! and shuts every background worker down exactly once.

use crate::aggregator::{Aggregation, Aggregator};
use crate::anomaly::{AnomalyDetector, AnomalyRecord};
use crate::collectors::{CollectorStats, EventCollector, EventStore};
use crate::config::Config;
use crate::error::AnalyticsError;
use crate::events::{
    AnalyticsEvent, BusinessMetric, MetricName, MetricsSnapshot, Payload, PerformanceMetric,
    Severity, SystemHealth, Tags, Timestamp, UserBehavior,
};
use crate::predictor::{Prediction, Predictor};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::Instant;

/// Read-only view of one service, recomputed on every query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dashboard {
    pub timestamp: Timestamp,
    pub service_id: String,
    pub aggregations: Vec<Aggregation>,
    pub anomalies: Vec<AnomalyRecord>,
    pub predictions: Vec<Prediction>,
    pub system_health: SystemHealth,
}

/// Classify a service from its recent anomalies and latest error rate
///
/// Anomalies are expected newest first and already limited to the lookback.
pub fn classify_health(
    recent_anomalies: &[AnomalyRecord],
    latest_error_rate: Option<f64>,
    error_rate_warning: f64,
) -> SystemHealth {
    if recent_anomalies
        .iter()
        .any(|a| a.severity == Severity::Critical)
    {
        return SystemHealth::Critical;
    }

    let error_rate_high = latest_error_rate.map_or(false, |rate| rate > error_rate_warning);
    if !recent_anomalies.is_empty() || error_rate_high {
        return SystemHealth::Warning;
    }

    SystemHealth::Healthy
}

/// Entry point to the analytics pipeline
pub struct AnalyticsService {
    collector: EventCollector<EventStore>,
    aggregator: Aggregator,
    detector: AnomalyDetector,
    predictor: Predictor,
    config: Config,
    closed: AtomicBool,
    /// Writers and triggers hold it shared; `close` holds it exclusively, so
    /// nothing is mid-call once shutdown begins
    gate: RwLock<()>,
}

impl AnalyticsService {
    /// Build the pipeline without starting any background worker
    ///
    /// Cycles only run through the `*_now` triggers until
    /// [`start`](Self::start) is called.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::Config` if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self, AnalyticsError> {
        config.validate()?;

        let store = EventStore::new(
            config.collector.store_max_age(),
            config.collector.store_max_events,
        );

        Ok(Self {
            collector: EventCollector::new(
                config.collector.buffer_capacity,
                config.collector.flush_interval(),
                store,
            ),
            aggregator: Aggregator::new(config.aggregator.interval(), config.aggregator.retention),
            detector: AnomalyDetector::new(config.anomaly.clone()),
            predictor: Predictor::new(config.predictor.clone()),
            config,
            closed: AtomicBool::new(false),
            gate: RwLock::new(()),
        })
    }

    /// Build the pipeline and start every background worker
    pub fn launch(config: Config) -> Result<Self, AnalyticsError> {
        let service = Self::new(config)?;
        service.start()?;
        Ok(service)
    }

    /// Start the collector flush, aggregation, detection and prediction workers
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::Closed` after [`close`](Self::close), or
    /// `AnalyticsError::WorkerSpawn` if a worker thread cannot be created.
    pub fn start(&self) -> Result<(), AnalyticsError> {
        let _open = self.enter()?;

        self.collector.start()?;
        self.aggregator.start()?;
        self.detector.start()?;
        self.predictor.start()?;

        info!("Analytics service started");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<RwLockReadGuard<'_, ()>, AnalyticsError> {
        let guard = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(AnalyticsError::Closed);
        }
        Ok(guard)
    }

    /// Route an event to the collector and the aggregator
    fn ingest(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        let _open = self.enter()?;
        self.aggregator.add_event(&event);
        self.collector.record_event(event)
    }

    /// Record a free-form event
    pub fn record_event(
        &self,
        event_type: &str,
        service_id: &str,
        user_id: &str,
        payload: Payload,
        tags: Tags,
    ) -> Result<(), AnalyticsError> {
        self.ingest(AnalyticsEvent::new(
            event_type, service_id, user_id, payload, tags,
        ))
    }

    /// Record a metrics snapshot for a service
    ///
    /// The snapshot feeds the aggregator, detector and predictor, and an audit
    /// copy goes through the collector.
    #[allow(clippy::too_many_arguments)]
    pub fn record_metrics(
        &self,
        service_id: &str,
        cpu_usage: f64,
        memory_usage: f64,
        disk_usage: f64,
        request_rate: f64,
        error_rate: f64,
        latency_ms: f64,
        cache_hit_rate: f64,
    ) -> Result<(), AnalyticsError> {
        self.record_snapshot(MetricsSnapshot::new(
            service_id,
            cpu_usage,
            memory_usage,
            disk_usage,
            request_rate,
            error_rate,
            latency_ms,
            cache_hit_rate,
        ))
    }

    /// Record an already built metrics snapshot
    pub fn record_snapshot(&self, snapshot: MetricsSnapshot) -> Result<(), AnalyticsError> {
        let _open = self.enter()?;

        self.aggregator.add_metrics(&snapshot);
        self.detector.record_metric(&snapshot);
        self.predictor.record_metric(&snapshot);
        self.collector.record_event(snapshot.to_event())
    }

    pub fn record_user_behavior(&self, behavior: &UserBehavior) -> Result<(), AnalyticsError> {
        self.ingest(behavior.to_event())
    }

    pub fn record_performance_metric(
        &self,
        metric: &PerformanceMetric,
    ) -> Result<(), AnalyticsError> {
        self.ingest(metric.to_event())
    }

    pub fn record_business_metric(&self, metric: &BusinessMetric) -> Result<(), AnalyticsError> {
        self.ingest(metric.to_event())
    }

    /// Drain the collector queue into the event store now
    pub fn flush_now(&self) -> Result<usize, AnalyticsError> {
        let _open = self.enter()?;
        self.collector.flush_now()
    }

    /// Close the current aggregation window now
    pub fn aggregate_now(&self) -> Result<usize, AnalyticsError> {
        let _open = self.enter()?;
        Ok(self.aggregator.aggregate_now())
    }

    /// Run one anomaly detection cycle now
    pub fn detect_anomalies_now(&self) -> Result<usize, AnalyticsError> {
        let _open = self.enter()?;
        Ok(self.detector.detect_anomalies_now())
    }

    /// Run one prediction cycle now
    pub fn make_predictions_now(&self) -> Result<usize, AnalyticsError> {
        let _open = self.enter()?;
        Ok(self.predictor.make_predictions_now())
    }

    /// Aggregation history for a service, most recent last
    pub fn get_aggregations(&self, service_id: &str) -> Vec<Aggregation> {
        self.aggregator.get_aggregations(service_id)
    }

    pub fn latest_aggregation(&self, service_id: &str, metric_name: &str) -> Option<Aggregation> {
        self.aggregator.latest_aggregation(service_id, metric_name)
    }

    /// Most recent anomalies for a service, newest first
    pub fn get_anomalies(&self, service_id: &str, limit: usize) -> Vec<AnomalyRecord> {
        self.detector.get_anomalies(service_id, limit)
    }

    /// Most recent anomalies across all services, newest first
    pub fn get_all_anomalies(&self, limit: usize) -> Vec<AnomalyRecord> {
        self.detector.get_all_anomalies(limit)
    }

    /// Most recent predictions for a service, newest first
    pub fn get_predictions(&self, service_id: &str, limit: usize) -> Vec<Prediction> {
        self.predictor.get_predictions(service_id, limit)
    }

    pub fn collector_stats(&self) -> CollectorStats {
        self.collector.stats()
    }

    /// Flushed events younger than `window`, oldest first
    ///
    /// Events still waiting in the collector queue are not included.
    pub fn recent_events(
        &self,
        service_id: Option<&str>,
        window: chrono::Duration,
    ) -> Vec<AnalyticsEvent> {
        self.collector.with_sink(|store| {
            store
                .recent_events(service_id, window)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    /// Services with at least one aggregation record, sorted
    pub fn known_services(&self) -> Vec<String> {
        self.aggregator.services()
    }

    /// Health classification for a service
    pub fn system_health(&self, service_id: &str) -> SystemHealth {
        let lookback = self.config.health.anomaly_lookback;
        let anomalies = self.detector.get_anomalies(service_id, lookback);
        let error_rate = self
            .aggregator
            .latest_aggregation(service_id, MetricName::ErrorRate.as_str())
            .map(|aggregation| aggregation.avg);

        classify_health(&anomalies, error_rate, self.config.health.error_rate_warning)
    }

    /// Dashboard view of a service
    ///
    /// An unknown service yields empty collections and `healthy`.
    pub fn get_dashboard_data(&self, service_id: &str) -> Dashboard {
        let lookback = self.config.health.anomaly_lookback;
        // One prediction cycle's worth for the service
        let predictions =
            MetricName::ALL.len() * self.config.predictor.horizons_seconds.len();

        Dashboard {
            timestamp: Utc::now(),
            service_id: service_id.to_string(),
            aggregations: self.aggregator.get_aggregations(service_id),
            anomalies: self.detector.get_anomalies(service_id, lookback),
            predictions: self.predictor.get_predictions(service_id, predictions),
            system_health: self.system_health(service_id),
        }
    }

    /// Stop every worker and drain the collector
    ///
    /// Only the first call does any work; later calls wait for it and return
    /// `Ok(())`. Reads keep answering from the final state.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::ShutdownTimedOut` if shutdown outlasted the
    /// configured grace period, otherwise the first worker error hit.
    pub fn close(&self) -> Result<(), AnalyticsError> {
        let _closing = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Analytics service already closed");
            return Ok(());
        }

        info!("Closing analytics service");
        let started = Instant::now();

        let results = [
            self.aggregator.stop(),
            self.detector.stop(),
            self.predictor.stop(),
            self.collector.close(),
        ];

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                warn!("Error while stopping pipeline component: {}", e);
                first_error.get_or_insert(e);
            }
        }

        let elapsed = started.elapsed();
        let grace = self.config.shutdown.grace_period();
        if elapsed > grace {
            error!(
                "Analytics service shutdown took {:?}, exceeding grace period {:?}",
                elapsed, grace
            );
            return Err(AnalyticsError::ShutdownTimedOut { elapsed, grace });
        }

        info!("Analytics service closed in {:?}", elapsed);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for AnalyticsService {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing analytics service on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BUSINESS_SERVICE, USER_BEHAVIOR_SERVICE};
    use serde_json::Value;

    fn service() -> AnalyticsService {
        AnalyticsService::new(Config::default()).unwrap()
    }

    fn anomaly(severity: Severity) -> AnomalyRecord {
        AnomalyRecord {
            id: "a".to_string(),
            timestamp: Utc::now(),
            service_id: "service1".to_string(),
            metric_name: MetricName::CpuUsage,
            observed_value: 200.0,
            baseline_mean: 50.0,
            baseline_std_dev: 1.0,
            score: 150.0,
            severity,
            description: String::new(),
        }
    }

    #[test]
    fn test_classify_health() {
        assert_eq!(classify_health(&[], None, 0.05), SystemHealth::Healthy);
        assert_eq!(classify_health(&[], Some(0.01), 0.05), SystemHealth::Healthy);
        assert_eq!(classify_health(&[], Some(0.2), 0.05), SystemHealth::Warning);
        assert_eq!(
            classify_health(&[anomaly(Severity::Warning)], None, 0.05),
            SystemHealth::Warning
        );
        assert_eq!(
            classify_health(
                &[anomaly(Severity::Warning), anomaly(Severity::Critical)],
                Some(0.01),
                0.05
            ),
            SystemHealth::Critical
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.collector.buffer_capacity = 0;
        assert!(matches!(
            AnalyticsService::new(config),
            Err(AnalyticsError::Config(_))
        ));
    }

    #[test]
    fn test_store_age_bounds_at_service_level() {
        let mut config = Config::default();
        config.collector.store_max_age_seconds = u64::MAX;
        assert!(matches!(
            AnalyticsService::new(config),
            Err(AnalyticsError::Config(_))
        ));

        let mut config = Config::default();
        config.collector.store_max_age_seconds = crate::config::MAX_STORE_AGE_SECONDS;
        let service = AnalyticsService::new(config.clone()).unwrap();
        assert_eq!(service.config(), &config);

        service
            .record_event("click", "web", "user1", Payload::new(), Tags::new())
            .unwrap();
        service.flush_now().unwrap();
        assert_eq!(service.recent_events(None, chrono::Duration::MAX).len(), 1);
    }

    #[test]
    fn test_record_event_reaches_store_and_aggregator() {
        let service = service();
        let mut payload = Payload::new();
        payload.insert("value".to_string(), Value::from(12.5));

        service
            .record_event("checkout", "shop", "user1", payload, Tags::new())
            .unwrap();
        assert_eq!(service.flush_now().unwrap(), 1);
        assert_eq!(service.aggregate_now().unwrap(), 1);

        let aggregation = service.latest_aggregation("shop", "checkout").unwrap();
        assert_eq!(aggregation.sum, 12.5);
        let events = service.recent_events(Some("shop"), chrono::Duration::minutes(1));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "checkout");
    }

    #[test]
    fn test_record_metrics_routes_everywhere() {
        let service = service();
        service
            .record_metrics("api", 50.0, 60.0, 70.0, 100.0, 0.01, 20.0, 90.0)
            .unwrap();
        service
            .record_metrics("api", 52.0, 60.0, 70.0, 100.0, 0.01, 20.0, 90.0)
            .unwrap();

        assert_eq!(service.flush_now().unwrap(), 2);
        let audit = service.recent_events(Some("api"), chrono::Duration::minutes(1));
        assert!(audit.iter().all(|e| e.event_type == "metrics"));

        assert_eq!(service.aggregate_now().unwrap(), MetricName::ALL.len());
        let cpu = service.latest_aggregation("api", "cpu_usage").unwrap();
        assert_eq!(cpu.count, 2);
        assert_eq!(cpu.avg, 51.0);

        assert_eq!(service.detect_anomalies_now().unwrap(), 0);
        assert_eq!(service.make_predictions_now().unwrap(), 21);
        assert_eq!(service.known_services(), vec!["api".to_string()]);
    }

    #[test]
    fn test_producer_records_use_their_service_ids() {
        let service = service();
        service
            .record_user_behavior(&UserBehavior {
                user_id: "u1".to_string(),
                action: "login".to_string(),
                duration_ms: 250,
                success: true,
                ..UserBehavior::default()
            })
            .unwrap();
        service
            .record_performance_metric(&PerformanceMetric {
                service_id: "search".to_string(),
                operation: "query".to_string(),
                duration_ms: 35.0,
                success: true,
                ..PerformanceMetric::default()
            })
            .unwrap();
        service
            .record_business_metric(&BusinessMetric {
                metric_type: "revenue".to_string(),
                value: 99.0,
                unit: "usd".to_string(),
                ..BusinessMetric::default()
            })
            .unwrap();
        service.aggregate_now().unwrap();

        let login = service
            .latest_aggregation(USER_BEHAVIOR_SERVICE, "user_behavior.login")
            .unwrap();
        assert_eq!(login.sum, 250.0);
        let query = service
            .latest_aggregation("search", "performance.query")
            .unwrap();
        assert_eq!(query.sum, 35.0);
        let revenue = service
            .latest_aggregation(BUSINESS_SERVICE, "business.revenue")
            .unwrap();
        assert_eq!(revenue.sum, 99.0);
    }

    #[test]
    fn test_high_error_rate_warns() {
        let service = service();
        service
            .record_metrics("api", 50.0, 60.0, 70.0, 100.0, 0.2, 20.0, 90.0)
            .unwrap();
        service.aggregate_now().unwrap();

        assert_eq!(service.system_health("api"), SystemHealth::Warning);
        assert_eq!(
            service.get_dashboard_data("api").system_health,
            SystemHealth::Warning
        );
    }

    #[test]
    fn test_dashboard_for_unknown_service() {
        let service = service();
        let dashboard = service.get_dashboard_data("nobody");

        assert_eq!(dashboard.service_id, "nobody");
        assert!(dashboard.aggregations.is_empty());
        assert!(dashboard.anomalies.is_empty());
        assert!(dashboard.predictions.is_empty());
        assert_eq!(dashboard.system_health, SystemHealth::Healthy);
        assert!(dashboard.timestamp.timestamp() > 0);
    }

    #[test]
    fn test_close_is_idempotent_and_rejects_writes() {
        let service = service();
        service.start().unwrap();
        service
            .record_metrics("api", 50.0, 60.0, 70.0, 100.0, 0.01, 20.0, 90.0)
            .unwrap();

        service.close().unwrap();
        service.close().unwrap();
        assert!(service.is_closed());

        // The final drain stored the audit event
        assert_eq!(service.collector_stats().flushed, 1);

        assert!(matches!(
            service.record_event("x", "api", "u", Payload::new(), Tags::new()),
            Err(AnalyticsError::Closed)
        ));
        assert!(matches!(service.aggregate_now(), Err(AnalyticsError::Closed)));
        assert!(matches!(
            service.detect_anomalies_now(),
            Err(AnalyticsError::Closed)
        ));
        assert!(matches!(
            service.make_predictions_now(),
            Err(AnalyticsError::Closed)
        ));
        assert!(matches!(service.flush_now(), Err(AnalyticsError::Closed)));
        assert!(matches!(service.start(), Err(AnalyticsError::Closed)));

        // Reads still answer
        assert!(service.get_aggregations("api").is_empty());
    }
}
