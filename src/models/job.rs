use crate::services::input::InputRef;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default number of additional attempts after the first failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Stable identity of a job, assigned at enqueue time and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// Pending ──► Processing ──► Completed | Failed | Cancelled
///    │
///    └──────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Closed set of failure categories for conversion errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Io,
    Configuration,
    Permission,
    Memory,
    Network,
    Model,
    Validation,
    Unknown,
}

impl ErrorCategory {
    /// Category-level retry rule. Missing input files are IO errors but are
    /// flagged non-retryable where they are constructed.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permission | Self::Validation)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Configuration => "configuration",
            Self::Permission => "permission",
            Self::Memory => "memory",
            Self::Network => "network",
            Self::Model => "model",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failure details recorded on a job that ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub category: ErrorCategory,
    pub message: String,
    /// Exception-type label reported by the collaborator (e.g. `NotFound`, `timeout`)
    pub kind: String,
}

/// One queued conversion request and its mutable lifecycle state.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub input: InputRef,
    pub status: JobStatus,
    progress: f32,
    pub error: Option<JobError>,

    pub created_at: DateTime<Local>,
    pub started_at: Option<DateTime<Local>>,
    pub ended_at: Option<DateTime<Local>>,

    /// Advisory unit count (pages for PDFs, 1 for images, 0 when unknown)
    pub unit_count: u32,
    pub elapsed: Duration,
    pub time_per_unit: Duration,

    pub retry_count: u32,
    pub max_retries: u32,

    /// Set when a cancel request arrives while the job is `Processing`
    pub cancel_requested: bool,

    /// Bumped on every mutation so renderers can skip unchanged rows
    pub revision: u64,
}

impl Job {
    pub fn new(id: JobId, input: InputRef, max_retries: u32) -> Self {
        Self {
            id,
            input,
            status: JobStatus::Pending,
            progress: 0.0,
            error: None,
            created_at: Local::now(),
            started_at: None,
            ended_at: None,
            unit_count: 0,
            elapsed: Duration::ZERO,
            time_per_unit: Duration::ZERO,
            retry_count: 0,
            max_retries,
            cancel_requested: false,
            revision: 0,
        }
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Set progress, clamped to `[0, 1]`.
    pub fn set_progress(&mut self, progress: f32) {
        self.progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
    }

    /// Move to `next` if the state machine allows it. Returns `false` and
    /// leaves the job untouched otherwise.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }

        let now = Local::now();
        match next {
            JobStatus::Processing => {
                self.started_at = Some(now);
                self.set_progress(0.0);
            }
            JobStatus::Completed => {
                self.ended_at = Some(now);
                self.set_progress(1.0);
            }
            JobStatus::Failed | JobStatus::Cancelled => {
                self.ended_at = Some(now);
            }
            JobStatus::Pending => {}
        }

        self.status = next;
        true
    }

    /// Record one more retry; refuses once `max_retries` is reached.
    pub fn record_retry(&mut self) -> bool {
        if self.retry_count >= self.max_retries {
            return false;
        }
        self.retry_count += 1;
        true
    }

    /// Record the wall time of the conversion and derive per-unit time.
    pub fn record_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
        self.time_per_unit = if self.unit_count > 0 {
            elapsed / self.unit_count
        } else {
            Duration::ZERO
        };
    }

    /// Human readable timing line, e.g. `12 pages, 30.0s total, 2.50s/page`.
    pub fn timing_summary(&self) -> String {
        if self.unit_count > 0 {
            format!(
                "{} pages, {:.1}s total, {:.2}s/page",
                self.unit_count,
                self.elapsed.as_secs_f64(),
                self.time_per_unit.as_secs_f64()
            )
        } else {
            format!("{:.1}s total", self.elapsed.as_secs_f64())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobId(1), InputRef::new("/tmp/a.pdf"), DEFAULT_MAX_RETRIES)
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.progress(), 0.0);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut job = job();
        job.set_progress(1.7);
        assert_eq!(job.progress(), 1.0);
        job.set_progress(-0.3);
        assert_eq!(job.progress(), 0.0);
        job.set_progress(f32::NAN);
        assert_eq!(job.progress(), 0.0);
    }

    #[test]
    fn test_valid_transitions() {
        let mut job = job();
        assert!(job.transition(JobStatus::Processing));
        assert!(job.started_at.is_some());
        assert!(job.transition(JobStatus::Completed));
        assert!(job.ended_at.is_some());
        assert_eq!(job.progress(), 1.0);
    }

    #[test]
    fn test_pending_can_be_cancelled_directly() {
        let mut job = job();
        assert!(job.transition(JobStatus::Cancelled));
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_pending_cannot_skip_to_completed() {
        let mut job = job();
        assert!(!job.transition(JobStatus::Completed));
        assert!(!job.transition(JobStatus::Failed));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_retry_count_never_exceeds_max() {
        let mut job = job();
        for _ in 0..10 {
            job.record_retry();
        }
        assert_eq!(job.retry_count, job.max_retries);
    }

    #[test]
    fn test_record_elapsed_per_unit() {
        let mut job = job();
        job.unit_count = 4;
        job.record_elapsed(Duration::from_secs(10));
        assert_eq!(job.time_per_unit, Duration::from_millis(2500));
        assert!(job.timing_summary().contains("4 pages"));

        job.unit_count = 0;
        job.record_elapsed(Duration::from_secs(3));
        assert_eq!(job.time_per_unit, Duration::ZERO);
        assert_eq!(job.timing_summary(), "3.0s total");
    }

    #[test]
    fn test_category_retryability() {
        assert!(!ErrorCategory::Permission.is_retryable());
        assert!(!ErrorCategory::Validation.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Io.is_retryable());
        assert!(ErrorCategory::Unknown.is_retryable());
    }
}
