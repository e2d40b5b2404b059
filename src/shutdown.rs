// ShutdownCoordinator - cooperative cancellation and bounded teardown
//
// The worker cannot be interrupted mid-conversion, so shutdown sets the
// cancellation flag, stops the dispatcher and then waits a bounded time.
// A worker still converting after the timeout is left to finish on its own.

use crate::memory::Reclaim;
use crate::worker::{StopReason, panic_message};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// No worker thread was running
    NotRunning,
    Joined(StopReason),
    /// The worker was still finishing its current job when the wait ended
    TimedOut,
    /// The worker thread itself panicked
    WorkerPanicked,
}

/// Owns the cancellation flag observed by the worker and the stop flag
/// observed by the update dispatcher.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    cancel: watch::Sender<bool>,
    dispatcher_stop: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cancel: watch::Sender::new(false),
            dispatcher_stop: watch::Sender::new(false),
        }
    }

    /// Receiver for the worker's cancellation checkpoints.
    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Receiver for [`UpdateDispatcher::run`](crate::ui::UpdateDispatcher::run).
    pub fn dispatcher_receiver(&self) -> watch::Receiver<bool> {
        self.dispatcher_stop.subscribe()
    }

    pub fn is_requested(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Set the cancellation flag. Returns true only for the first call.
    pub fn request_cancel(&self) -> bool {
        let first = self.cancel.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
        if first {
            tracing::info!("Shutdown requested, cancelling pending jobs");
        }
        first
    }

    /// Cancel, stop the dispatcher, wait up to `timeout` for the worker and
    /// release cached rendering state. Safe to call more than once.
    pub fn shutdown(
        &self,
        worker: Option<JoinHandle<StopReason>>,
        timeout: Duration,
        cached: Option<&mut dyn Reclaim>,
    ) -> ShutdownOutcome {
        self.request_cancel();
        self.dispatcher_stop.send_replace(true);

        let outcome = match worker {
            Some(handle) => join_with_timeout(handle, timeout),
            None => ShutdownOutcome::NotRunning,
        };

        if let Some(cached) = cached {
            cached.release();
        }

        tracing::info!("Shutdown finished: {:?}", outcome);
        outcome
    }
}

/// Wait for `handle` to finish, giving up after `timeout`.
pub fn join_with_timeout(handle: JoinHandle<StopReason>, timeout: Duration) -> ShutdownOutcome {
    let deadline = Instant::now() + timeout;

    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(
                "Worker still finishing its current job after {:?}, continuing shutdown",
                timeout
            );
            return ShutdownOutcome::TimedOut;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }

    match handle.join() {
        Ok(reason) => ShutdownOutcome::Joined(reason),
        Err(payload) => {
            tracing::error!("Worker thread panicked: {}", panic_message(payload.as_ref()));
            ShutdownOutcome::WorkerPanicked
        }
    }
}
