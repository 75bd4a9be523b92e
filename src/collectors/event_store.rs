//! Event store with rolling buffer implementation
//!
//! This module provides the EventStore, the default destination for events
//! flushed out of the collector. It keeps recent events in a time-windowed
//! rolling buffer with a capacity limit.

use crate::events::AnalyticsEvent;
use chrono::{Duration, Utc};
use std::collections::VecDeque;

/// Destination for batches of events drained from the collector queue
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send {
    /// Store one flushed batch; events arrive in intake order
    fn store_batch(&mut self, events: Vec<AnalyticsEvent>);
}

/// Recent event history with rolling buffer storage
///
/// Events older than `max_age` are pruned on every write, and when capacity is
/// reached the oldest events are removed.
#[derive(Debug)]
pub struct EventStore {
    buffer: VecDeque<AnalyticsEvent>,
    max_age: Duration,
    max_size: usize,
}

impl EventStore {
    /// Create a new EventStore with specified limits
    ///
    /// # Arguments
    ///
    /// * `max_age` - Maximum age for events before they are pruned
    /// * `max_size` - Maximum number of events to store
    ///
    /// # Examples
    ///
    /// ```
    /// use pulse::collectors::EventStore;
    /// use chrono::Duration;
    ///
    /// let store = EventStore::new(Duration::seconds(60), 1000);
    /// assert!(store.is_empty());
    /// ```
    pub fn new(max_age: Duration, max_size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(max_size.min(4096)),
            max_age,
            max_size,
        }
    }

    /// Add a single event, pruning expired entries and enforcing capacity
    pub fn add(&mut self, event: AnalyticsEvent) {
        self.buffer.push_back(event);
        self.enforce_capacity();
        self.prune_old_entries();
    }

    /// Get recent events within the specified duration
    ///
    /// When `service_id` is given only that service's events are returned.
    /// Events are returned oldest first. A window reaching past the earliest
    /// representable time returns every stored event.
    pub fn recent_events(
        &self,
        service_id: Option<&str>,
        duration: Duration,
    ) -> Vec<&AnalyticsEvent> {
        let cutoff = Utc::now().checked_sub_signed(duration);
        self.buffer
            .iter()
            .filter(|event| cutoff.map_or(true, |cutoff| event.timestamp >= cutoff))
            .filter(|event| service_id.map_or(true, |id| event.service_id == id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Remove all events older than `max_age`
    pub fn prune_old_entries(&mut self) {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.max_age) else {
            return;
        };
        self.buffer.retain(|event| event.timestamp >= cutoff);
    }

    fn enforce_capacity(&mut self) {
        while self.buffer.len() > self.max_size {
            self.buffer.pop_front();
        }
    }
}

impl Default for EventStore {
    fn default() -> Self {
        // Default: one hour window, 10000 events max
        Self::new(Duration::hours(1), 10_000)
    }
}

impl EventSink for EventStore {
    fn store_batch(&mut self, events: Vec<AnalyticsEvent>) {
        self.buffer.extend(events);
        self.enforce_capacity();
        self.prune_old_entries();
    }
}
