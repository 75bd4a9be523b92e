use crate::collectors::event_store::EventSink;
use crate::error::AnalyticsError;
use crate::events::AnalyticsEvent;
use crate::scheduler::{lock, CycleWorker};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counters describing the collector's intake queue
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectorStats {
    /// Events accepted onto the queue
    pub accepted: u64,
    /// Events dropped because the queue was full
    pub dropped: u64,
    /// Events drained from the queue into the sink
    pub flushed: u64,
    /// Events currently waiting in the queue
    pub queue_depth: u64,
}

/// State touched by every flush, whichever path triggered it
struct FlushState<S> {
    receiver: Receiver<AnalyticsEvent>,
    sink: S,
}

struct Shared<S> {
    state: Mutex<FlushState<S>>,
    accepted: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
}

impl<S: EventSink> Shared<S> {
    /// Drain the queue and hand the batch to the sink under one lock
    ///
    /// A flush either stores the whole drained batch or does not start.
    fn flush(&self) -> usize {
        let mut state = lock(&self.state);
        let batch: Vec<AnalyticsEvent> = state.receiver.try_iter().collect();
        let count = batch.len();

        if count > 0 {
            state.sink.store_batch(batch);
            self.flushed.fetch_add(count as u64, Ordering::SeqCst);
            debug!("Flushed {} events from collector queue", count);
        }

        count
    }
}

/// Buffered intake point for analytics events
///
/// Producers enqueue events onto a bounded queue without blocking. When the
/// queue is full the incoming event is dropped and counted (drop-newest). A
/// background worker drains the queue into the sink every flush interval.
pub struct EventCollector<S: EventSink + 'static> {
    sender: SyncSender<AnalyticsEvent>,
    shared: Arc<Shared<S>>,
    flush_interval: Duration,
    worker: Mutex<Option<CycleWorker>>,
    closed: AtomicBool,
}

impl<S: EventSink + 'static> EventCollector<S> {
    /// Create a collector with a queue of `capacity` events feeding `sink`
    ///
    /// The collector does not flush on its own until [`start`](Self::start)
    /// is called.
    pub fn new(capacity: usize, flush_interval: Duration, sink: S) -> Self {
        let (sender, receiver) = mpsc::sync_channel(capacity);

        Self {
            sender,
            shared: Arc::new(Shared {
                state: Mutex::new(FlushState { receiver, sink }),
                accepted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                flushed: AtomicU64::new(0),
            }),
            flush_interval,
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Start the background flush worker
    ///
    /// Starting an already running collector is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::Closed` after [`close`](Self::close), or
    /// `AnalyticsError::WorkerSpawn` if the flush thread cannot be created.
    pub fn start(&self) -> Result<(), AnalyticsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AnalyticsError::Closed);
        }

        let mut worker = lock(&self.worker);
        if worker.is_some() {
            debug!("EventCollector already running, skipping start");
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let started = CycleWorker::spawn("collector-flush", self.flush_interval, move || {
            shared.flush();
        })?;

        info!(
            "EventCollector started worker '{}' with flush interval {:?}",
            started.name(),
            started.interval()
        );
        *worker = Some(started);
        Ok(())
    }

    /// Enqueue an event without blocking
    ///
    /// A full queue drops the event and counts it; that is not an error.
    ///
    /// An event that races [`close`](Self::close) and is accepted after the
    /// final drain is drained here instead, so every accepted event reaches
    /// the sink.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::Closed` after [`close`](Self::close).
    pub fn record_event(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AnalyticsError::Closed);
        }

        match self.sender.try_send(event) {
            Ok(()) => {
                self.shared.accepted.fetch_add(1, Ordering::SeqCst);
                if self.closed.load(Ordering::SeqCst) {
                    let late = self.shared.flush();
                    debug!("Drained {} events accepted during close", late);
                }
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                if dropped.is_power_of_two() {
                    warn!(
                        "Collector queue full, dropped event '{}' from '{}' ({} dropped so far)",
                        event.event_type, event.service_id, dropped
                    );
                }
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(AnalyticsError::Closed),
        }
    }

    /// Drain the queue into the sink immediately
    ///
    /// Returns the number of events flushed.
    pub fn flush_now(&self) -> Result<usize, AnalyticsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AnalyticsError::Closed);
        }
        Ok(self.shared.flush())
    }

    /// Read the sink's state under the flush lock
    pub fn with_sink<R>(&self, read: impl FnOnce(&S) -> R) -> R {
        let state = lock(&self.shared.state);
        read(&state.sink)
    }

    pub fn stats(&self) -> CollectorStats {
        let accepted = self.shared.accepted.load(Ordering::SeqCst);
        let flushed = self.shared.flushed.load(Ordering::SeqCst);

        CollectorStats {
            accepted,
            dropped: self.shared.dropped.load(Ordering::SeqCst),
            flushed,
            queue_depth: accepted.saturating_sub(flushed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop the flush worker and drain whatever is left in the queue
    ///
    /// Only the first call does any work; later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::WorkerJoin` if the flush thread panicked. The
    /// final drain still runs in that case.
    pub fn close(&self) -> Result<(), AnalyticsError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("EventCollector already closed");
            return Ok(());
        }

        info!("Closing EventCollector");
        let stop_result = match lock(&self.worker).take() {
            Some(mut worker) => worker.stop(),
            None => Ok(()),
        };

        let remaining = self.shared.flush();
        info!(
            "EventCollector closed after final flush of {} events",
            remaining
        );
        stop_result
    }
}
