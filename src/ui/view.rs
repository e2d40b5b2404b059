// QueueView - interface-owned rendering state for the job list
//
// Only mutated on the interface thread, through bridge callbacks or the
// dispatcher's housekeeping hook. Rows are cached per job and rebuilt only
// when the job's revision changed.

use crate::memory::Reclaim;
use crate::models::{Job, JobId, JobStatus};
use crate::queue::TaskQueue;
use indexmap::IndexMap;

/// Placeholder text shown when the queue is empty.
pub const EMPTY_PLACEHOLDER: &str = "No jobs queued. Add PDF or image files to start.";

/// Display model of one job row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowModel {
    pub id: JobId,
    pub title: String,
    pub status: JobStatus,
    pub progress: f32,
    /// Error message for failed jobs, timing for completed ones
    pub detail: String,
    revision: u64,
}

impl RowModel {
    pub fn from_job(job: &Job) -> Self {
        let detail = match job.status {
            JobStatus::Failed => job
                .error
                .as_ref()
                .map(|e| format!("[{}] {}", e.category, e.message))
                .unwrap_or_default(),
            JobStatus::Completed => job.timing_summary(),
            JobStatus::Processing if job.retry_count > 0 => {
                format!("retry {}/{}", job.retry_count, job.max_retries)
            }
            _ => String::new(),
        };

        Self {
            id: job.id,
            title: job.input.display_name.clone(),
            status: job.status,
            progress: job.progress(),
            detail,
            revision: job.revision,
        }
    }
}

/// Counts from one [`QueueView::render`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub rebuilt: usize,
    pub reused: usize,
}

#[derive(Debug, Default)]
pub struct QueueView {
    /// Least recently rendered first
    rows: IndexMap<JobId, RowModel>,
    visible: Vec<JobId>,
    page_label: String,
    info_line: String,
    show_placeholder: bool,
    window_size: usize,
    dirty: bool,
}

impl QueueView {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            show_placeholder: true,
            dirty: true,
            ..Self::default()
        }
    }

    /// Mark the view stale; the next housekeeping pass re-renders it.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rebuild the visible window from the queue, reusing unchanged rows.
    pub fn render(&mut self, queue: &TaskQueue) -> RenderStats {
        let page = queue.page();
        let stats = queue.stats();
        let mut render = RenderStats::default();

        self.visible = page.jobs.iter().map(|job| job.id).collect();
        for job in &page.jobs {
            match self.rows.shift_remove(&job.id) {
                Some(row) if row.revision == job.revision => {
                    self.rows.insert(job.id, row);
                    render.reused += 1;
                }
                _ => {
                    self.rows.insert(job.id, RowModel::from_job(job));
                    render.rebuilt += 1;
                }
            }
        }

        self.page_label = page.info.label();
        self.info_line = stats.info_line();
        self.show_placeholder = stats.total == 0;
        self.dirty = false;

        tracing::trace!(
            "Rendered page: {} rows rebuilt, {} reused",
            render.rebuilt,
            render.reused
        );
        render
    }

    /// Rows in the current window, in queue order.
    pub fn visible_rows(&self) -> Vec<&RowModel> {
        self.visible
            .iter()
            .filter_map(|id| self.rows.get(id))
            .collect()
    }

    pub fn cached_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn page_label(&self) -> &str {
        &self.page_label
    }

    pub fn info_line(&self) -> &str {
        &self.info_line
    }

    /// `Some` with the placeholder text when the queue is empty.
    pub fn placeholder(&self) -> Option<&'static str> {
        self.show_placeholder.then_some(EMPTY_PLACEHOLDER)
    }
}

impl Reclaim for QueueView {
    fn collect(&mut self) -> usize {
        let excess = self.rows.len().saturating_sub(self.window_size);
        self.rows.drain(..excess);
        if excess > 0 {
            self.dirty = true;
        }
        excess
    }

    fn evict_offscreen(&mut self) -> usize {
        let before = self.rows.len();
        let visible = &self.visible;
        self.rows.retain(|id, _| visible.contains(id));
        before - self.rows.len()
    }

    fn release(&mut self) {
        self.rows.clear();
        self.visible.clear();
        self.dirty = true;
    }
}
