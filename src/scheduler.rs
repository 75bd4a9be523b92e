//! Background cycle workers
//!
//! Every periodic job in the pipeline (collector flush, aggregation, anomaly
//! detection, prediction) runs on a [`CycleWorker`]: a named thread that waits
//! on a shutdown channel with a timeout equal to the cycle interval and runs the
//! cycle each time the wait times out. Dropping the shutdown sender wakes the
//! thread immediately; the thread finishes whatever cycle it is in and exits.

use crate::error::AnalyticsError;
use log::{debug, error, info};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lock a component's state, recovering it if a previous holder panicked
///
/// Component state is only mutated by whole append or cycle steps, so the data
/// behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A named background thread running one cycle at a fixed interval
#[derive(Debug)]
pub struct CycleWorker {
    name: String,
    interval: Duration,
    shutdown_sender: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CycleWorker {
    /// Spawn a worker that calls `cycle` every `interval` until stopped
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::WorkerSpawn` if the OS refuses to create the thread.
    pub fn spawn<F>(name: &str, interval: Duration, mut cycle: F) -> Result<Self, AnalyticsError>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown_sender, shutdown_receiver) = mpsc::channel::<()>();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                info!("{} worker started with interval {:?}", thread_name, interval);

                loop {
                    match shutdown_receiver.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            debug!("{} worker running scheduled cycle", thread_name);
                            cycle();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            info!("{} worker received shutdown signal", thread_name);
                            break;
                        }
                    }
                }

                info!("{} worker stopped", thread_name);
            })
            .map_err(|source| AnalyticsError::WorkerSpawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            interval,
            shutdown_sender: Some(shutdown_sender),
            thread_handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    /// Signal the worker to stop and wait for its current cycle to finish
    ///
    /// Calling `stop` on a stopped worker is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AnalyticsError::WorkerJoin` if the worker thread panicked.
    pub fn stop(&mut self) -> Result<(), AnalyticsError> {
        // Dropping the sender disconnects the channel and wakes the thread.
        self.shutdown_sender.take();

        if let Some(handle) = self.thread_handle.take() {
            debug!("Waiting for {} worker to join", self.name);
            handle.join().map_err(|_| {
                error!("Failed to join {} worker", self.name);
                AnalyticsError::WorkerJoin(self.name.clone())
            })?;
        }

        Ok(())
    }
}

impl Drop for CycleWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Error stopping {} worker on drop: {}", self.name, e);
        }
    }
}
