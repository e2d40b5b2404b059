// Performance metrics module
//
// Lightweight counters for the queue engine, shared by the worker, the
// update bridge and housekeeping.

use crate::queue::QueueSummary;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Engine-wide counters.
///
/// Uses atomic operations for thread-safe tracking without locks. Logged
/// periodically by the worker and once at shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Jobs claimed by the worker
    pub jobs_started: AtomicU64,

    pub jobs_completed: AtomicU64,

    pub jobs_failed: AtomicU64,

    pub jobs_cancelled: AtomicU64,

    /// Retry attempts scheduled by the retry policy
    pub retries: AtomicU64,

    /// Pages converted by completed jobs
    pub units_processed: AtomicU64,

    /// Wall time spent in successful conversions, in milliseconds
    pub conversion_time_ms: AtomicU64,

    /// Callbacks handed to the update bridge
    pub updates_requested: AtomicU64,

    /// Callbacks executed on the interface side
    pub callbacks_run: AtomicU64,

    /// Callbacks that panicked and were skipped
    pub callbacks_failed: AtomicU64,

    /// Coalesced flushes performed by the dispatcher
    pub flushes: AtomicU64,

    /// Memory-pressure collections triggered
    pub memory_collections: AtomicU64,

    /// Finished jobs dropped by housekeeping
    pub jobs_evicted: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_started: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            units_processed: AtomicU64::new(0),
            conversion_time_ms: AtomicU64::new(0),
            updates_requested: AtomicU64::new(0),
            callbacks_run: AtomicU64::new(0),
            callbacks_failed: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            memory_collections: AtomicU64::new(0),
            jobs_evicted: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_job_started(&self) -> u64 {
        self.jobs_started.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a successful conversion and its page count.
    pub fn record_job_completed(&self, units: u32, elapsed: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.units_processed
            .fetch_add(u64::from(units), Ordering::Relaxed);
        self.conversion_time_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_jobs_cancelled(&self, count: usize) {
        self.jobs_cancelled
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_requested(&self) {
        self.updates_requested.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one flush that ran `callbacks` callbacks, `failed` of which panicked.
    pub fn record_flush(&self, callbacks: usize, failed: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.callbacks_run
            .fetch_add(callbacks as u64, Ordering::Relaxed);
        self.callbacks_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn record_memory_collection(&self) {
        self.memory_collections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: usize) {
        self.jobs_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average seconds per converted page, 0 when nothing was converted.
    pub fn avg_secs_per_unit(&self) -> f64 {
        let total = self.conversion_time_ms.load(Ordering::Relaxed);
        let units = self.units_processed.load(Ordering::Relaxed);
        if units > 0 {
            total as f64 / 1000.0 / units as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        let uptime = self.uptime();
        tracing::info!("=== Conversion Summary ===");
        tracing::info!("Uptime: {:.2}s", uptime.as_secs_f64());
        tracing::info!(
            "Jobs: {} completed, {} failed, {} cancelled, {} started ({} retries)",
            self.jobs_completed.load(Ordering::Relaxed),
            self.jobs_failed.load(Ordering::Relaxed),
            self.jobs_cancelled.load(Ordering::Relaxed),
            self.jobs_started.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Pages: {}, conversion time: {:.2}s (avg: {:.2}s per page)",
            self.units_processed.load(Ordering::Relaxed),
            self.conversion_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_secs_per_unit()
        );
        tracing::info!(
            "Updates: {} requested, {} run, {} failed, {} flushes",
            self.updates_requested.load(Ordering::Relaxed),
            self.callbacks_run.load(Ordering::Relaxed),
            self.callbacks_failed.load(Ordering::Relaxed),
            self.flushes.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Housekeeping: {} memory collections, {} jobs evicted",
            self.memory_collections.load(Ordering::Relaxed),
            self.jobs_evicted.load(Ordering::Relaxed)
        );
    }

    /// Log periodic metrics (for long-running queues)
    pub fn log_periodic(&self, summary: &QueueSummary) {
        tracing::info!(
            "Progress: {}/{} finished ({} failed), {} pages, {:.2}s/page, {:.1} pages/min, uptime {:.0}s",
            summary.completed + summary.failed + summary.cancelled,
            summary.total,
            summary.failed,
            summary.total_units,
            summary.avg_time_per_unit().as_secs_f64(),
            summary.units_per_minute(),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.jobs_completed.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.jobs_failed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_job_outcomes() {
        let metrics = Metrics::new();

        assert_eq!(metrics.record_job_started(), 1);
        assert_eq!(metrics.record_job_started(), 2);
        metrics.record_job_completed(4, Duration::from_millis(800));
        metrics.record_job_failed();
        metrics.record_jobs_cancelled(3);
        metrics.record_retry();

        assert_eq!(metrics.jobs_completed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.jobs_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.jobs_cancelled.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.retries.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.units_processed.load(Ordering::Relaxed), 4);
        assert!((metrics.avg_secs_per_unit() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_avg_without_units() {
        let metrics = Metrics::new();
        metrics.record_job_completed(0, Duration::from_secs(1));
        assert_eq!(metrics.avg_secs_per_unit(), 0.0);
    }

    #[test]
    fn test_flush_counters() {
        let metrics = Metrics::new();
        metrics.record_update_requested();
        metrics.record_flush(5, 1);
        metrics.record_flush(2, 0);

        assert_eq!(metrics.flushes.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.callbacks_run.load(Ordering::Relaxed), 7);
        assert_eq!(metrics.callbacks_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_uptime() {
        let metrics = Metrics::new();
        thread::sleep(Duration::from_millis(10));
        assert!(metrics.uptime().as_millis() >= 10);
    }
}
