// TaskQueue - ordered, capacity-bounded job collection
//
// One mutex covers the job list, the id counter, the worker flag and the
// display window, so ordering, status and pagination offsets are always
// observed together. Locked sections are pure data operations; the
// conversion call never runs under this lock.

use crate::config::SettingsHandle;
use crate::models::{Job, JobId, JobStatus};
use crate::services::input::InputRef;
use crate::ui::pagination::{PageInfo, Paginator};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full ({capacity} jobs)")]
    Backpressure { capacity: usize },

    #[error("job {0} is being processed")]
    JobProcessing(JobId),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("the worker is converting, stop it before clearing the queue")]
    WorkerActive,

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Per-status counts from a single locked pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl QueueStats {
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    /// Info line shown above the job list.
    pub fn info_line(&self) -> String {
        format!(
            "Total: {} | Pending: {} | Processing: {} | Completed: {} | Failed: {}",
            self.total, self.pending, self.processing, self.completed, self.failed
        )
    }
}

/// End-of-run statistics over completed jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
    pub total_units: u64,
    pub total_time: Duration,
}

impl QueueSummary {
    pub fn avg_time_per_unit(&self) -> Duration {
        match u32::try_from(self.total_units) {
            Ok(units) if units > 0 => self.total_time / units,
            _ => Duration::ZERO,
        }
    }

    pub fn units_per_minute(&self) -> f64 {
        let minutes = self.total_time.as_secs_f64() / 60.0;
        if minutes > 0.0 {
            self.total_units as f64 / minutes
        } else {
            0.0
        }
    }
}

/// Result of [`TaskQueue::enqueue_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub accepted: Vec<JobId>,
    pub rejected: Vec<InputRef>,
}

/// Visible jobs plus the page they belong to.
#[derive(Debug, Clone, Default)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub info: PageInfo,
}

struct QueueInner {
    jobs: Vec<Job>,
    window: Paginator,
    next_id: u64,
    worker_active: bool,
}

impl QueueInner {
    fn position(&self, id: JobId) -> Option<usize> {
        self.jobs.iter().position(|job| job.id == id)
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut Job, QueueError> {
        self.jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(QueueError::NotFound(id))
    }

    fn push(&mut self, input: InputRef, max_retries: u32) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.jobs.push(Job::new(id, input, max_retries));
        self.window.set_total(self.jobs.len());
        id
    }

    fn sync_window(&mut self) -> bool {
        self.window.set_total(self.jobs.len())
    }
}

/// Ordered, bounded collection of jobs shared between the interface thread
/// and the worker.
///
/// Capacity and the retry limit for new jobs are read from the
/// [`SettingsHandle`] on every call.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    settings: SettingsHandle,
}

impl TaskQueue {
    pub fn new(settings: SettingsHandle) -> Self {
        let window_size = settings.read(|s| s.job_window_size);
        Self {
            inner: Mutex::new(QueueInner {
                jobs: Vec::new(),
                window: Paginator::new(window_size),
                next_id: 1,
                worker_active: false,
            }),
            settings,
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut QueueInner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    /// Append a new pending job. Rejected when the queue is at capacity;
    /// nothing is started implicitly.
    pub fn enqueue(&self, input: InputRef) -> Result<JobId, QueueError> {
        let (capacity, max_retries) = self.settings.read(|s| (s.max_queue_size, s.max_retries));

        self.with_inner(|inner| {
            if inner.jobs.len() >= capacity {
                tracing::warn!(
                    "Queue full ({} jobs), rejecting {}",
                    capacity,
                    input.display_name
                );
                return Err(QueueError::Backpressure { capacity });
            }

            let id = inner.push(input, max_retries);
            tracing::debug!("Enqueued job {}", id);
            Ok(id)
        })
    }

    /// Enqueue as many inputs as fit, in order; the rest are handed back.
    pub fn enqueue_batch(&self, inputs: Vec<InputRef>) -> BatchOutcome {
        let (capacity, max_retries) = self.settings.read(|s| (s.max_queue_size, s.max_retries));

        self.with_inner(|inner| {
            let room = capacity.saturating_sub(inner.jobs.len());
            let mut outcome = BatchOutcome::default();

            for (i, input) in inputs.into_iter().enumerate() {
                if i < room {
                    outcome.accepted.push(inner.push(input, max_retries));
                } else {
                    outcome.rejected.push(input);
                }
            }

            if !outcome.rejected.is_empty() {
                tracing::warn!(
                    "Queue capacity {} reached: accepted {}, rejected {}",
                    capacity,
                    outcome.accepted.len(),
                    outcome.rejected.len()
                );
            } else {
                tracing::info!("Enqueued {} jobs", outcome.accepted.len());
            }

            outcome
        })
    }

    /// Claim the oldest pending job, moving it to `Processing`.
    ///
    /// Returns a snapshot of the claimed job. Refuses to claim while another
    /// job is still `Processing`.
    pub fn dequeue_next_pending(&self) -> Option<Job> {
        self.with_inner(|inner| {
            if let Some(busy) = inner.jobs.iter().find(|j| j.status == JobStatus::Processing) {
                tracing::warn!("Job {} still processing, not dequeuing another", busy.id);
                return None;
            }

            let job = inner
                .jobs
                .iter_mut()
                .find(|job| job.status == JobStatus::Pending)?;
            job.transition(JobStatus::Processing);
            job.revision += 1;
            Some(job.clone())
        })
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.with_inner(|inner| inner.jobs.iter().find(|j| j.id == id).cloned())
    }

    /// Mutate one job in place and bump its revision.
    pub fn update<R>(&self, id: JobId, f: impl FnOnce(&mut Job) -> R) -> Result<R, QueueError> {
        self.with_inner(|inner| {
            let job = inner.job_mut(id)?;
            let result = f(job);
            job.revision += 1;
            Ok(result)
        })
    }

    /// Move a job along the state machine, applying `f` first.
    ///
    /// Returns the updated job.
    pub fn transition(
        &self,
        id: JobId,
        next: JobStatus,
        f: impl FnOnce(&mut Job),
    ) -> Result<Job, QueueError> {
        self.with_inner(|inner| {
            let job = inner.job_mut(id)?;
            if !job.status.can_transition_to(next) {
                return Err(QueueError::InvalidTransition {
                    id,
                    from: job.status,
                    to: next,
                });
            }
            f(job);
            job.transition(next);
            job.revision += 1;
            Ok(job.clone())
        })
    }

    /// Delete a job that is not being processed.
    ///
    /// Returns whether the display window had to be re-clamped.
    pub fn remove(&self, id: JobId) -> Result<bool, QueueError> {
        self.with_inner(|inner| {
            let index = inner.position(id).ok_or(QueueError::NotFound(id))?;
            if inner.jobs[index].status == JobStatus::Processing {
                return Err(QueueError::JobProcessing(id));
            }

            let job = inner.jobs.remove(index);
            tracing::debug!("Removed job {} ({})", job.id, job.input.display_name);
            Ok(inner.sync_window())
        })
    }

    /// Empty the queue and reset the window. Refused while the worker runs.
    pub fn clear(&self) -> Result<(), QueueError> {
        self.with_inner(|inner| {
            let processing = inner.jobs.iter().any(|j| j.status == JobStatus::Processing);
            if inner.worker_active || processing {
                return Err(QueueError::WorkerActive);
            }

            if !inner.jobs.is_empty() {
                tracing::info!("Cleared {} jobs", inner.jobs.len());
            }
            inner.jobs.clear();
            inner.window.reset();
            inner.sync_window();
            Ok(())
        })
    }

    /// Cancel a job.
    ///
    /// Pending jobs become `Cancelled` immediately. For the processing job
    /// only a request is recorded; the worker honors it at its next
    /// checkpoint. Returns the job's status after the call.
    pub fn cancel(&self, id: JobId) -> Result<JobStatus, QueueError> {
        self.with_inner(|inner| {
            let job = inner.job_mut(id)?;
            match job.status {
                JobStatus::Pending => {
                    job.transition(JobStatus::Cancelled);
                    job.revision += 1;
                    tracing::info!("Cancelled pending job {}", id);
                }
                JobStatus::Processing => {
                    job.cancel_requested = true;
                    job.revision += 1;
                    tracing::info!("Cancellation requested for processing job {}", id);
                }
                _ => {}
            }
            Ok(job.status)
        })
    }

    /// Move every pending job to `Cancelled`.
    pub fn cancel_all_pending(&self) -> Vec<JobId> {
        self.with_inner(|inner| {
            inner
                .jobs
                .iter_mut()
                .filter(|job| job.status == JobStatus::Pending)
                .map(|job| {
                    job.transition(JobStatus::Cancelled);
                    job.revision += 1;
                    job.id
                })
                .collect()
        })
    }

    pub fn is_cancel_requested(&self, id: JobId) -> bool {
        self.with_inner(|inner| {
            inner
                .jobs
                .iter()
                .any(|job| job.id == id && job.cancel_requested)
        })
    }

    pub fn set_worker_active(&self, active: bool) {
        self.with_inner(|inner| inner.worker_active = active);
    }

    /// Clear the worker flag unless a pending job could still be dequeued.
    /// Checked under the same lock as `enqueue`, so a job can never be left
    /// waiting without a worker.
    pub fn release_worker_if_idle(&self) -> bool {
        self.with_inner(|inner| {
            let stuck = inner.jobs.iter().any(|j| j.status == JobStatus::Processing);
            let idle = stuck || !inner.jobs.iter().any(|j| j.status == JobStatus::Pending);
            if idle {
                inner.worker_active = false;
            }
            idle
        })
    }

    pub fn is_worker_active(&self) -> bool {
        self.with_inner(|inner| inner.worker_active)
    }

    pub fn has_pending(&self) -> bool {
        self.with_inner(|inner| inner.jobs.iter().any(|j| j.status == JobStatus::Pending))
    }

    pub fn len(&self) -> usize {
        self.with_inner(|inner| inner.jobs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.with_inner(|inner| {
            let mut stats = QueueStats {
                total: inner.jobs.len(),
                ..QueueStats::default()
            };
            for job in &inner.jobs {
                match job.status {
                    JobStatus::Pending => stats.pending += 1,
                    JobStatus::Processing => stats.processing += 1,
                    JobStatus::Completed => stats.completed += 1,
                    JobStatus::Failed => stats.failed += 1,
                    JobStatus::Cancelled => stats.cancelled += 1,
                }
            }
            stats
        })
    }

    pub fn summary(&self) -> QueueSummary {
        self.with_inner(|inner| {
            let mut summary = QueueSummary {
                total: inner.jobs.len(),
                ..QueueSummary::default()
            };
            for job in &inner.jobs {
                match job.status {
                    JobStatus::Completed => {
                        summary.completed += 1;
                        summary.total_units += u64::from(job.unit_count);
                        summary.total_time += job.elapsed;
                    }
                    JobStatus::Failed => summary.failed += 1,
                    JobStatus::Cancelled => summary.cancelled += 1,
                    _ => {}
                }
            }
            summary
        })
    }

    /// Drop the oldest terminal jobs so at most `retained` remain.
    ///
    /// Returns the ids that were evicted, oldest first.
    pub fn evict_terminal(&self, retained: usize) -> Vec<JobId> {
        self.with_inner(|inner| {
            let mut terminal: Vec<_> = inner
                .jobs
                .iter()
                .filter(|job| job.status.is_terminal())
                .map(|job| (job.ended_at, job.id))
                .collect();

            if terminal.len() <= retained {
                return Vec::new();
            }

            terminal.sort();
            let excess = terminal.len() - retained;
            let evicted: Vec<JobId> = terminal.into_iter().take(excess).map(|(_, id)| id).collect();
            let doomed: HashSet<JobId> = evicted.iter().copied().collect();

            inner.jobs.retain(|job| !doomed.contains(&job.id));
            inner.sync_window();

            tracing::info!(
                "Evicted {} finished jobs, {} jobs remain",
                evicted.len(),
                inner.jobs.len()
            );
            evicted
        })
    }

    /// Jobs in the current display window.
    pub fn page(&self) -> JobPage {
        self.with_inner(|inner| JobPage {
            jobs: inner.jobs[inner.window.current_slice()].to_vec(),
            info: inner.window.page_info(),
        })
    }

    pub fn page_info(&self) -> PageInfo {
        self.with_inner(|inner| inner.window.page_info())
    }

    pub fn next_page(&self) -> bool {
        self.with_inner(|inner| inner.window.next_page())
    }

    pub fn prev_page(&self) -> bool {
        self.with_inner(|inner| inner.window.prev_page())
    }

    pub fn go_to_page(&self, page: usize) -> bool {
        self.with_inner(|inner| inner.window.go_to_page(page))
    }

    /// Copy of every job in insertion order.
    pub fn snapshot(&self) -> Vec<Job> {
        self.with_inner(|inner| inner.jobs.clone())
    }
}
