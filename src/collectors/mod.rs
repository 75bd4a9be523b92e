/// Bounded, non-blocking intake queue with a background flush worker
pub mod event_collector;

/// Rolling event history that receives flushed batches
pub mod event_store;

pub use event_collector::{CollectorStats, EventCollector};
pub use event_store::{EventSink, EventStore};
