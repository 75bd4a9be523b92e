//! Core record types for the analytics pipeline
//!
//! This module defines the values that flow between producers and the pipeline
//! components: raw events, metric snapshots, the producer-side behavior,
//! performance and business records, and the shared classification enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Free-form event payload
pub type Payload = HashMap<String, Value>;

/// String tags attached to an event
pub type Tags = HashMap<String, String>;

/// Payload key holding the numeric sample value the aggregator summarizes
pub const VALUE_KEY: &str = "value";

/// Service id under which user behavior is recorded
pub const USER_BEHAVIOR_SERVICE: &str = "users";

/// Service id under which business metrics are recorded
pub const BUSINESS_SERVICE: &str = "business";

/// A single discrete occurrence reported by a producer
///
/// Immutable once created. Events from one producer keep insertion order;
/// there is no global order across services.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsEvent {
    pub id: String,
    pub timestamp: Timestamp,
    pub event_type: String,
    pub service_id: String,
    pub user_id: String,
    pub payload: Payload,
    pub tags: Tags,
}

impl AnalyticsEvent {
    /// Create an event stamped with a fresh id and the current time
    pub fn new(
        event_type: impl Into<String>,
        service_id: impl Into<String>,
        user_id: impl Into<String>,
        payload: Payload,
        tags: Tags,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            service_id: service_id.into(),
            user_id: user_id.into(),
            payload,
            tags,
        }
    }

    /// Numeric sample carried by the payload's `value` entry, if any
    pub fn numeric_value(&self) -> Option<f64> {
        self.payload.get(VALUE_KEY).and_then(Value::as_f64)
    }
}

/// One point-in-time sample of a service's resource and traffic metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub id: String,
    pub timestamp: Timestamp,
    pub service_id: String,
    /// CPU usage as a percentage (0-100)
    pub cpu_usage: f64,
    /// Memory usage as a percentage (0-100)
    pub memory_usage: f64,
    /// Disk usage as a percentage (0-100)
    pub disk_usage: f64,
    /// Requests per second
    pub request_rate: f64,
    /// Fraction of failed requests (0-1)
    pub error_rate: f64,
    /// Request latency in milliseconds
    pub latency_ms: f64,
    /// Cache hit rate as a percentage (0-100)
    pub cache_hit_rate: f64,
}

impl MetricsSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service_id: impl Into<String>,
        cpu_usage: f64,
        memory_usage: f64,
        disk_usage: f64,
        request_rate: f64,
        error_rate: f64,
        latency_ms: f64,
        cache_hit_rate: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            service_id: service_id.into(),
            cpu_usage,
            memory_usage,
            disk_usage,
            request_rate,
            error_rate,
            latency_ms,
            cache_hit_rate,
        }
    }

    /// Audit event mirroring this snapshot, recorded through the collector
    pub fn to_event(&self) -> AnalyticsEvent {
        let payload = MetricName::ALL
            .iter()
            .map(|name| (name.as_str().to_string(), Value::from(name.value_of(self))))
            .collect();

        AnalyticsEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: self.timestamp,
            event_type: "metrics".to_string(),
            service_id: self.service_id.clone(),
            user_id: String::new(),
            payload,
            tags: Tags::new(),
        }
    }
}

/// The metrics carried by a [`MetricsSnapshot`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    CpuUsage,
    MemoryUsage,
    DiskUsage,
    RequestRate,
    ErrorRate,
    Latency,
    CacheHitRate,
}

impl MetricName {
    pub const ALL: [MetricName; 7] = [
        MetricName::CpuUsage,
        MetricName::MemoryUsage,
        MetricName::DiskUsage,
        MetricName::RequestRate,
        MetricName::ErrorRate,
        MetricName::Latency,
        MetricName::CacheHitRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CpuUsage => "cpu_usage",
            MetricName::MemoryUsage => "memory_usage",
            MetricName::DiskUsage => "disk_usage",
            MetricName::RequestRate => "request_rate",
            MetricName::ErrorRate => "error_rate",
            MetricName::Latency => "latency",
            MetricName::CacheHitRate => "cache_hit_rate",
        }
    }

    /// Read this metric's reading out of a snapshot
    pub fn value_of(&self, snapshot: &MetricsSnapshot) -> f64 {
        match self {
            MetricName::CpuUsage => snapshot.cpu_usage,
            MetricName::MemoryUsage => snapshot.memory_usage,
            MetricName::DiskUsage => snapshot.disk_usage,
            MetricName::RequestRate => snapshot.request_rate,
            MetricName::ErrorRate => snapshot.error_rate,
            MetricName::Latency => snapshot.latency_ms,
            MetricName::CacheHitRate => snapshot.cache_hit_rate,
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far an anomalous sample strayed from its baseline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Beyond the detection threshold
    Warning,
    /// Beyond the critical multiplier
    Critical,
}

/// Three-level health classification shown on the dashboard
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    Healthy,
    Warning,
    Critical,
}

impl SystemHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemHealth::Healthy => "healthy",
            SystemHealth::Warning => "warning",
            SystemHealth::Critical => "critical",
        }
    }
}

impl fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user interaction reported by a client-facing service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserBehavior {
    pub user_id: String,
    pub action: String,
    pub content_id: String,
    pub client_address: String,
    pub user_agent: String,
    pub session_id: String,
    pub duration_ms: i64,
    pub success: bool,
    pub error_detail: String,
}

impl UserBehavior {
    /// Normalize into a `user_behavior.<action>` event valued by its duration
    pub fn to_event(&self) -> AnalyticsEvent {
        let mut payload = Payload::new();
        payload.insert(VALUE_KEY.to_string(), Value::from(self.duration_ms));
        payload.insert("content_id".to_string(), Value::from(self.content_id.clone()));
        payload.insert("success".to_string(), Value::from(self.success));
        if !self.error_detail.is_empty() {
            payload.insert("error".to_string(), Value::from(self.error_detail.clone()));
        }

        let mut tags = Tags::new();
        tags.insert("client_address".to_string(), self.client_address.clone());
        tags.insert("user_agent".to_string(), self.user_agent.clone());
        tags.insert("session_id".to_string(), self.session_id.clone());

        AnalyticsEvent::new(
            format!("user_behavior.{}", self.action),
            USER_BEHAVIOR_SERVICE,
            self.user_id.clone(),
            payload,
            tags,
        )
    }
}

/// Timing of one operation inside a service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PerformanceMetric {
    pub service_id: String,
    pub operation: String,
    pub duration_ms: f64,
    pub resource_used: f64,
    pub throughput: f64,
    pub success: bool,
    pub error_type: String,
}

impl PerformanceMetric {
    /// Normalize into a `performance.<operation>` event valued by its duration
    pub fn to_event(&self) -> AnalyticsEvent {
        let mut payload = Payload::new();
        payload.insert(VALUE_KEY.to_string(), Value::from(self.duration_ms));
        payload.insert("resource_used".to_string(), Value::from(self.resource_used));
        payload.insert("throughput".to_string(), Value::from(self.throughput));
        payload.insert("success".to_string(), Value::from(self.success));
        if !self.error_type.is_empty() {
            payload.insert("error".to_string(), Value::from(self.error_type.clone()));
        }

        AnalyticsEvent::new(
            format!("performance.{}", self.operation),
            self.service_id.clone(),
            String::new(),
            payload,
            Tags::new(),
        )
    }
}

/// A business-level measurement such as revenue or sign-ups
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BusinessMetric {
    pub metric_type: String,
    pub value: f64,
    pub unit: String,
    pub dimensions: Tags,
}

impl BusinessMetric {
    /// Normalize into a `business.<metric_type>` event; dimensions become tags
    pub fn to_event(&self) -> AnalyticsEvent {
        let mut payload = Payload::new();
        payload.insert(VALUE_KEY.to_string(), Value::from(self.value));
        payload.insert("unit".to_string(), Value::from(self.unit.clone()));

        AnalyticsEvent::new(
            format!("business.{}", self.metric_type),
            BUSINESS_SERVICE,
            String::new(),
            payload,
            self.dimensions.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_name_serialization() {
        assert_eq!(
            serde_json::to_string(&MetricName::CpuUsage).unwrap(),
            "\"cpu_usage\""
        );
        assert_eq!(
            serde_json::to_string(&MetricName::CacheHitRate).unwrap(),
            "\"cache_hit_rate\""
        );
        for name in MetricName::ALL {
            let json = serde_json::to_string(&name).unwrap();
            assert_eq!(json, format!("\"{}\"", name.as_str()));
        }
    }

    #[test]
    fn test_value_of_reads_every_field() {
        let snapshot = MetricsSnapshot::new("svc", 1.0, 2.0, 3.0, 4.0, 0.5, 6.0, 7.0);
        let values: Vec<f64> = MetricName::ALL
            .iter()
            .map(|name| name.value_of(&snapshot))
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0, 0.5, 6.0, 7.0]);
    }

    #[test]
    fn test_snapshot_audit_event() {
        let snapshot = MetricsSnapshot::new("svc", 42.0, 2.0, 3.0, 4.0, 0.5, 6.0, 7.0);
        let event = snapshot.to_event();
        assert_eq!(event.event_type, "metrics");
        assert_eq!(event.service_id, "svc");
        assert_eq!(event.timestamp, snapshot.timestamp);
        assert_eq!(event.payload["cpu_usage"], Value::from(42.0));
        assert_eq!(event.payload.len(), MetricName::ALL.len());
        assert_eq!(event.numeric_value(), None);
    }

    #[test]
    fn test_severity_and_health_ordering() {
        assert!(Severity::Warning < Severity::Critical);
        assert!(SystemHealth::Healthy < SystemHealth::Warning);
        assert!(SystemHealth::Warning < SystemHealth::Critical);
        assert_eq!(
            serde_json::to_string(&SystemHealth::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn test_user_behavior_normalization() {
        let behavior = UserBehavior {
            user_id: "user1".to_string(),
            action: "play".to_string(),
            content_id: "content1".to_string(),
            client_address: "127.0.0.1".to_string(),
            user_agent: "Mozilla".to_string(),
            session_id: "session1".to_string(),
            duration_ms: 5000,
            success: true,
            error_detail: String::new(),
        };

        let event = behavior.to_event();
        assert_eq!(event.event_type, "user_behavior.play");
        assert_eq!(event.service_id, USER_BEHAVIOR_SERVICE);
        assert_eq!(event.user_id, "user1");
        assert_eq!(event.numeric_value(), Some(5000.0));
        assert_eq!(event.tags["session_id"], "session1");
        assert!(!event.payload.contains_key("error"));
    }

    #[test]
    fn test_performance_and_business_normalization() {
        let perf = PerformanceMetric {
            service_id: "transcoder".to_string(),
            operation: "upload".to_string(),
            duration_ms: 120.5,
            success: false,
            error_type: "timeout".to_string(),
            ..Default::default()
        };
        let event = perf.to_event();
        assert_eq!(event.event_type, "performance.upload");
        assert_eq!(event.service_id, "transcoder");
        assert_eq!(event.numeric_value(), Some(120.5));
        assert_eq!(event.payload["error"], Value::from("timeout"));

        let mut dimensions = Tags::new();
        dimensions.insert("region".to_string(), "US".to_string());
        let business = BusinessMetric {
            metric_type: "revenue".to_string(),
            value: 100.0,
            unit: "USD".to_string(),
            dimensions,
        };
        let event = business.to_event();
        assert_eq!(event.event_type, "business.revenue");
        assert_eq!(event.service_id, BUSINESS_SERVICE);
        assert_eq!(event.tags["region"], "US");
        assert_eq!(event.numeric_value(), Some(100.0));
    }

    #[test]
    fn test_event_serialization() {
        let mut payload = Payload::new();
        payload.insert("key".to_string(), Value::from("value"));
        let event = AnalyticsEvent::new("test_event", "service1", "user1", payload, Tags::new());

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: AnalyticsEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }
}
