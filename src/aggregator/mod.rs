/// Windowed per-service, per-metric aggregation
pub mod event_aggregator;

pub use event_aggregator::{Aggregation, Aggregator};
