// Worker - the single background thread that drains the queue
//
// The conversion call is blocking and never interrupted. Cancellation is
// observed between jobs and during retry backoff only.

use crate::metrics::Metrics;
use crate::models::{ConversionOptions, Job, JobId, JobStatus};
use crate::queue::TaskQueue;
use crate::services::conversion::{ConversionError, ConversionRequest, Converter};
use crate::services::error_log::{ErrorLog, ErrorRecord};
use crate::services::metadata::estimate_unit_count;
use crate::services::retry::{RetryDecision, RetryPolicy};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Started jobs between two progress reports.
pub const PROGRESS_REPORT_INTERVAL: u64 = 50;

/// Progress of a job whose input has been read and validated.
pub const PREPARED_PROGRESS: f32 = 0.2;

/// How often a backoff wait checks for a per-job cancellation request.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why the worker thread exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No pending jobs were left
    Drained,
    /// The cancellation flag was observed
    Cancelled,
    /// The loop itself failed; the engine is stopped
    Crashed,
}

/// Notifications emitted by the worker, in order, from its own thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    JobStarted(JobId),
    JobRetrying {
        id: JobId,
        attempt: u32,
        delay: Duration,
    },
    JobFinished {
        id: JobId,
        status: JobStatus,
    },
    JobsCancelled(Vec<JobId>),
    Stopped(StopReason),
}

/// Receives worker events. Must not block.
pub type EventSink = Arc<dyn Fn(WorkerEvent) + Send + Sync>;

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Owns everything one worker run needs; consumed by [`Worker::run`].
pub struct Worker {
    queue: Arc<TaskQueue>,
    converter: Arc<dyn Converter>,
    error_log: Arc<dyn ErrorLog>,
    metrics: Arc<Metrics>,
    options: ConversionOptions,
    policy: RetryPolicy,
    cancel: watch::Receiver<bool>,
    events: Option<EventSink>,
}

impl Worker {
    pub fn new(
        queue: Arc<TaskQueue>,
        converter: Arc<dyn Converter>,
        error_log: Arc<dyn ErrorLog>,
        metrics: Arc<Metrics>,
        options: ConversionOptions,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            converter,
            error_log,
            metrics,
            options,
            policy: RetryPolicy::default(),
            cancel,
            events: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Run on a dedicated, named thread.
    pub fn spawn(self) -> io::Result<JoinHandle<StopReason>> {
        // Claimed before the thread starts so `clear()` is refused immediately.
        self.queue.set_worker_active(true);
        let queue = self.queue.clone();

        thread::Builder::new()
            .name("docqueue-worker".to_string())
            .spawn(move || self.run())
            .inspect_err(|_| queue.set_worker_active(false))
    }

    /// Drain the queue on the current thread until it is empty or cancelled.
    ///
    /// Must not be called from inside a tokio runtime.
    pub fn run(self) -> StopReason {
        tracing::info!(
            "Worker started with converter '{}'",
            self.converter.name()
        );
        self.queue.set_worker_active(true);

        let reason = match panic::catch_unwind(AssertUnwindSafe(|| self.run_loop())) {
            Ok(reason) => reason,
            Err(payload) => {
                tracing::error!("Worker loop crashed: {}", panic_message(payload.as_ref()));
                StopReason::Crashed
            }
        };

        self.queue.set_worker_active(false);
        self.emit(WorkerEvent::Stopped(reason));
        tracing::info!("Worker stopped: {:?}", reason);
        reason
    }

    fn emit(&self, event: WorkerEvent) {
        if let Some(events) = &self.events {
            events(event);
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn run_loop(&self) -> StopReason {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Failed to build worker timer runtime: {}", e);
                return StopReason::Crashed;
            }
        };

        loop {
            if self.is_cancelled() {
                let cancelled = self.queue.cancel_all_pending();
                tracing::info!(
                    "Cancellation observed, {} pending jobs cancelled",
                    cancelled.len()
                );
                self.metrics.record_jobs_cancelled(cancelled.len());
                if !cancelled.is_empty() {
                    self.emit(WorkerEvent::JobsCancelled(cancelled));
                }
                return StopReason::Cancelled;
            }

            let Some(job) = self.queue.dequeue_next_pending() else {
                // A job enqueued since the dequeue keeps this worker alive.
                if self.queue.release_worker_if_idle() {
                    tracing::info!("No pending jobs left");
                    return StopReason::Drained;
                }
                continue;
            };

            let started = self.metrics.record_job_started();
            tracing::info!(
                job = %job.id,
                "Starting conversion of {}",
                job.input.display_name
            );
            self.emit(WorkerEvent::JobStarted(job.id));

            let status =
                match panic::catch_unwind(AssertUnwindSafe(|| self.process(&job, &runtime))) {
                    Ok(status) => status,
                    Err(payload) => {
                        let err = ConversionError::panicked(panic_message(payload.as_ref()));
                        tracing::error!(job = %job.id, "Job processing panicked: {}", err.message);
                        self.fail(job.id, &err, Duration::ZERO)
                    }
                };

            self.emit(WorkerEvent::JobFinished { id: job.id, status });

            if started % PROGRESS_REPORT_INTERVAL == 0 {
                self.metrics.log_periodic(&self.queue.summary());
            }
        }
    }

    /// Convert one claimed job, retrying per policy. Returns its final status.
    ///
    /// The recorded elapsed time covers the attempts only, not the backoff.
    fn process(&self, job: &Job, runtime: &tokio::runtime::Runtime) -> JobStatus {
        let id = job.id;
        let mut active = Duration::ZERO;
        let mut units_known = false;

        loop {
            let attempt_start = Instant::now();
            let result = self.attempt(job, &mut units_known);
            active += attempt_start.elapsed();

            let err = match result {
                Ok(()) => return self.complete(id, active),
                Err(err) => err,
            };

            let max_retries = self.queue.settings().read(|s| s.max_retries);
            let retry_count = self
                .queue
                .update(id, |j| {
                    j.max_retries = max_retries.max(j.retry_count);
                    j.retry_count
                })
                .unwrap_or(max_retries);

            match self.policy.decide(&err, retry_count, max_retries) {
                RetryDecision::GiveUp => return self.fail(id, &err, active),
                RetryDecision::Retry { attempt, delay } => {
                    if let Err(e) = self.queue.update(id, |j| j.record_retry()) {
                        tracing::warn!("Failed to record retry: {}", e);
                    }
                    self.metrics.record_retry();
                    tracing::warn!(
                        job = %id,
                        category = %err.category,
                        attempt,
                        "Conversion failed ({}), retrying in {:?}",
                        err.message,
                        delay
                    );
                    self.emit(WorkerEvent::JobRetrying { id, attempt, delay });

                    if !self.wait_backoff(runtime, id, delay) {
                        return self.cancel_in_flight(id);
                    }
                }
            }
        }
    }

    /// One attempt. The input is read fresh every time.
    fn attempt(&self, job: &Job, units_known: &mut bool) -> Result<(), ConversionError> {
        let timeout = self.queue.settings().read(|s| s.job_timeout());
        let request = ConversionRequest::prepare(&self.options, &job.input, timeout)?;
        if let Err(e) = self
            .queue
            .update(job.id, |j| j.set_progress(PREPARED_PROGRESS))
        {
            tracing::debug!("Could not record progress: {}", e);
        }

        if !*units_known {
            let units = estimate_unit_count(&job.input, &request.input_bytes);
            *units_known = true;
            if let Err(e) = self.queue.update(job.id, |j| j.unit_count = units) {
                tracing::debug!("Could not record unit count: {}", e);
            }
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.converter.convert(&request))) {
            Ok(result) => result,
            Err(payload) => Err(ConversionError::panicked(panic_message(payload.as_ref()))),
        }
    }

    fn complete(&self, id: JobId, elapsed: Duration) -> JobStatus {
        match self
            .queue
            .transition(id, JobStatus::Completed, |j| j.record_elapsed(elapsed))
        {
            Ok(job) => {
                self.metrics.record_job_completed(job.unit_count, elapsed);
                tracing::info!(
                    job = %id,
                    retries = job.retry_count,
                    "Completed {}: {}",
                    job.input.display_name,
                    job.timing_summary()
                );
                JobStatus::Completed
            }
            Err(e) => {
                tracing::warn!("Could not mark job {} completed: {}", id, e);
                self.queue.get(id).map(|j| j.status).unwrap_or(JobStatus::Completed)
            }
        }
    }

    fn fail(&self, id: JobId, err: &ConversionError, elapsed: Duration) -> JobStatus {
        let job = match self.queue.transition(id, JobStatus::Failed, |j| {
            j.error = Some(err.to_job_error());
            j.record_elapsed(elapsed);
        }) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!("Could not mark job {} failed: {}", id, e);
                return self.queue.get(id).map(|j| j.status).unwrap_or(JobStatus::Failed);
            }
        };

        self.metrics.record_job_failed();
        tracing::error!(
            job = %id,
            category = %err.category,
            kind = %err.kind,
            retries = job.retry_count,
            "Conversion of {} failed: {}",
            job.input.display_name,
            err.message
        );

        if let Some(record) = ErrorRecord::from_job(&job) {
            if let Err(e) = self.error_log.record(&record) {
                tracing::error!("Failed to write error record for {}: {:#}", id, e);
            }
        }

        JobStatus::Failed
    }

    fn cancel_in_flight(&self, id: JobId) -> JobStatus {
        match self.queue.transition(id, JobStatus::Cancelled, |_| {}) {
            Ok(_) => {
                self.metrics.record_jobs_cancelled(1);
                tracing::info!(job = %id, "Job cancelled during retry backoff");
                JobStatus::Cancelled
            }
            Err(e) => {
                tracing::warn!("Could not cancel job {}: {}", id, e);
                self.queue.get(id).map(|j| j.status).unwrap_or(JobStatus::Cancelled)
            }
        }
    }

    /// Sleep for `delay` unless shutdown or a cancellation of job `id`
    /// arrives first. Returns false when cancelled.
    fn wait_backoff(&self, runtime: &tokio::runtime::Runtime, id: JobId, delay: Duration) -> bool {
        if self.is_cancelled() || self.queue.is_cancel_requested(id) {
            return false;
        }

        let mut cancel = self.cancel.clone();
        let queue = &self.queue;
        runtime.block_on(async move {
            let shutdown = async {
                match cancel.wait_for(|cancelled| *cancelled).await {
                    Ok(_) => {}
                    // Sender gone: nobody can cancel any more.
                    Err(_) => std::future::pending::<()>().await,
                }
            };

            let job_cancelled = async {
                let mut poll = tokio::time::interval(CANCEL_POLL_INTERVAL);
                loop {
                    poll.tick().await;
                    if queue.is_cancel_requested(id) {
                        break;
                    }
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = shutdown => false,
                _ = job_cancelled => false,
            }
        })
    }
}
