// Rate-limited eviction of finished jobs, run after dispatcher flushes.

use crate::metrics::Metrics;
use crate::models::JobId;
use crate::queue::TaskQueue;
use std::sync::Arc;
use std::time::Instant;

pub struct Housekeeping {
    queue: Arc<TaskQueue>,
    metrics: Arc<Metrics>,
    last_run: Option<Instant>,
}

impl Housekeeping {
    pub fn new(queue: Arc<TaskQueue>, metrics: Arc<Metrics>) -> Self {
        Self {
            queue,
            metrics,
            last_run: None,
        }
    }

    /// Evict old terminal jobs beyond `retained_completed_count`, at most
    /// once per cleanup interval. Returns the evicted ids.
    pub fn run(&mut self) -> Vec<JobId> {
        self.run_at(Instant::now())
    }

    pub fn run_at(&mut self, now: Instant) -> Vec<JobId> {
        let (interval, retained) = self
            .queue
            .settings()
            .read(|s| (s.cleanup_interval(), s.retained_completed_count));

        if let Some(last) = self.last_run {
            if now.saturating_duration_since(last) < interval {
                return Vec::new();
            }
        }
        self.last_run = Some(now);

        let evicted = self.queue.evict_terminal(retained);
        if !evicted.is_empty() {
            self.metrics.record_evicted(evicted.len());
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsHandle;
    use crate::models::{EngineSettings, JobStatus};
    use crate::services::input::InputRef;
    use std::time::Duration;

    fn finished_queue(finished: usize, retained: usize) -> Arc<TaskQueue> {
        let queue = Arc::new(TaskQueue::new(SettingsHandle::new(EngineSettings {
            retained_completed_count: retained,
            ..EngineSettings::default()
        })));
        for i in 0..finished {
            let id = queue.enqueue(InputRef::new(format!("/in/{}.pdf", i))).unwrap();
            queue.dequeue_next_pending();
            queue.transition(id, JobStatus::Completed, |_| {}).unwrap();
        }
        queue
    }

    #[test]
    fn test_evicts_beyond_retained_count() {
        let queue = finished_queue(8, 5);
        let mut housekeeping = Housekeeping::new(queue.clone(), Arc::new(Metrics::new()));

        assert_eq!(housekeeping.run().len(), 3);
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn test_rate_limited_by_cleanup_interval() {
        let queue = finished_queue(3, 1);
        let mut housekeeping = Housekeeping::new(queue.clone(), Arc::new(Metrics::new()));
        let start = Instant::now();

        assert_eq!(housekeeping.run_at(start).len(), 2);

        let id = queue.enqueue(InputRef::new("/in/late.pdf")).unwrap();
        queue.dequeue_next_pending();
        queue.transition(id, JobStatus::Failed, |_| {}).unwrap();

        assert!(housekeeping.run_at(start + Duration::from_secs(5)).is_empty());
        assert_eq!(housekeeping.run_at(start + Duration::from_secs(61)).len(), 1);
    }

    #[test]
    fn test_threshold_read_at_each_run() {
        let queue = finished_queue(4, 10);
        let mut housekeeping = Housekeeping::new(queue.clone(), Arc::new(Metrics::new()));
        let start = Instant::now();

        assert!(housekeeping.run_at(start).is_empty());
        queue.settings().update(|s| s.retained_completed_count = 1);
        assert_eq!(housekeeping.run_at(start + Duration::from_secs(120)).len(), 3);
    }
}
