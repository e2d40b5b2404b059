// UpdateBridge - coalesced notifications from the worker to the interface
//
// The worker thread never touches interface-owned state. It sends closures
// over an unbounded channel; the dispatcher, running on the interface
// thread, waits for the first one, lets one tick pass so bursts coalesce,
// then drains everything queued and runs it against the state it owns.
//
// Requests arriving while a flush runs stay in the channel and schedule the
// next flush, so the worker is never blocked by a slow interface.

use crate::metrics::Metrics;
use crate::worker::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

type Callback<T> = Box<dyn FnOnce(&mut T) + Send>;
type Housekeeping<T> = Box<dyn FnMut(&mut T) + Send>;

/// Create a connected bridge/dispatcher pair.
///
/// # Arguments
/// * `tick` - Coalescing delay between the first request and its flush
/// * `metrics` - Receives request and flush counts
pub fn update_bridge<T: 'static>(
    tick: Duration,
    metrics: Arc<Metrics>,
) -> (UpdateBridge<T>, UpdateDispatcher<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        UpdateBridge {
            tx,
            metrics: metrics.clone(),
        },
        UpdateDispatcher {
            rx,
            tick,
            housekeeping: Vec::new(),
            metrics,
        },
    )
}

/// Sending half, usable from any thread.
///
/// # Example
/// ```ignore
/// bridge.request_update(move |view: &mut QueueView| view.invalidate());
/// ```
pub struct UpdateBridge<T> {
    tx: mpsc::UnboundedSender<Callback<T>>,
    metrics: Arc<Metrics>,
}

// Manual Clone implementation to avoid requiring T: Clone
impl<T> Clone for UpdateBridge<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T: 'static> UpdateBridge<T> {
    /// Queue `update` to run on the interface thread at the next flush.
    ///
    /// Returns false if the dispatcher has stopped; the update is dropped.
    pub fn request_update<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        match self.tx.send(Box::new(update)) {
            Ok(()) => {
                self.metrics.record_update_requested();
                true
            }
            Err(_) => {
                tracing::debug!("Update dispatcher has stopped, dropping update");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, owned by the interface thread.
pub struct UpdateDispatcher<T> {
    rx: mpsc::UnboundedReceiver<Callback<T>>,
    tick: Duration,
    housekeeping: Vec<Housekeeping<T>>,
    metrics: Arc<Metrics>,
}

impl<T: 'static> UpdateDispatcher<T> {
    /// Run `hook` after every flush, e.g. a rate-limited memory check.
    pub fn with_housekeeping<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&mut T) + Send + 'static,
    {
        self.housekeeping.push(Box::new(hook));
        self
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Run every queued callback now, then the housekeeping hooks.
    ///
    /// Returns the number of callbacks run. Usable without `run` by hosts
    /// that drive their own tick.
    pub fn flush(&mut self, state: &mut T) -> usize {
        let mut batch = Vec::new();
        while let Ok(callback) = self.rx.try_recv() {
            batch.push(callback);
        }
        self.run_batch(state, batch)
    }

    fn run_batch(&mut self, state: &mut T, batch: Vec<Callback<T>>) -> usize {
        let count = batch.len();
        let mut failed = 0;

        for callback in batch {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(state))) {
                failed += 1;
                tracing::error!(
                    "Interface update callback panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }

        for hook in &mut self.housekeeping {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(state))) {
                tracing::error!(
                    "Housekeeping hook panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }

        self.metrics.record_flush(count, failed);
        if count > 0 {
            tracing::trace!("Flushed {} interface updates", count);
        }
        count
    }

    /// Receive loop: wait for a request, coalesce for one tick, flush.
    ///
    /// Returns when `shutdown` becomes true (a flush still waiting for its
    /// tick is dropped) or when every bridge has been dropped (remaining
    /// requests are flushed first).
    pub async fn run(mut self, state: &mut T, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Update dispatcher started (tick {:?})", self.tick);

        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                first = self.rx.recv() => first,
            };

            let Some(first) = first else {
                self.flush(state);
                break;
            };

            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = tokio::time::sleep(self.tick) => {}
            }

            let mut batch = vec![first];
            while let Ok(callback) = self.rx.try_recv() {
                batch.push(callback);
            }
            self.run_batch(state, batch);
        }

        tracing::debug!("Update dispatcher stopped");
    }
}
