//! Engine facade - one explicit instance owning the queue, the worker handle
//! and the channels between the worker and the interface thread.
//!
//! # Threads
//!
//! - **Interface thread**: owns the [`QueueView`] and drives the
//!   [`UpdateDispatcher`] returned by [`Engine::new`]. Never blocks on the
//!   worker.
//! - **Worker thread**: spawned by [`Engine::start`], drains the queue one job
//!   at a time and notifies the interface through the [`UpdateBridge`].
//!
//! # Example
//! ```ignore
//! let (mut engine, dispatcher) = Engine::new(settings, options, converter, error_log)?;
//! engine.enqueue_batch(inputs);
//! engine.start()?;
//!
//! let mut view = QueueView::new(50);
//! runtime.block_on(dispatcher.run(&mut view, engine.dispatcher_shutdown()));
//! engine.shutdown(Some(&mut view));
//! ```

use crate::config::SettingsHandle;
use crate::housekeeping::Housekeeping;
use crate::memory::{MemoryGuard, MemorySampler, Reclaim, SysinfoSampler};
use crate::metrics::Metrics;
use crate::models::{ConversionOptions, JobId, JobStatus};
use crate::queue::{BatchOutcome, QueueError, TaskQueue};
use crate::services::conversion::Converter;
use crate::services::error_log::ErrorLog;
use crate::services::input::InputRef;
use crate::services::retry::RetryPolicy;
use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome};
use crate::ui::bridge::{UpdateBridge, UpdateDispatcher, update_bridge};
use crate::ui::view::QueueView;
use crate::worker::{StopReason, Worker, WorkerEvent};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid conversion options: {0}")]
    InvalidOptions(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    #[error("engine has been shut down")]
    ShutDown,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct Engine {
    queue: Arc<TaskQueue>,
    converter: Arc<dyn Converter>,
    error_log: Arc<dyn ErrorLog>,
    metrics: Arc<Metrics>,
    options: ConversionOptions,
    policy: RetryPolicy,
    bridge: UpdateBridge<QueueView>,
    coordinator: ShutdownCoordinator,
    worker: Option<JoinHandle<StopReason>>,
}

impl Engine {
    /// Create an engine sampling process memory through `sysinfo`.
    ///
    /// Returns the engine and the dispatcher the interface thread must drive.
    pub fn new(
        settings: SettingsHandle,
        options: ConversionOptions,
        converter: Arc<dyn Converter>,
        error_log: Arc<dyn ErrorLog>,
    ) -> Result<(Self, UpdateDispatcher<QueueView>), EngineError> {
        Self::with_sampler(settings, options, converter, error_log, SysinfoSampler::new())
    }

    pub fn with_sampler<S>(
        settings: SettingsHandle,
        options: ConversionOptions,
        converter: Arc<dyn Converter>,
        error_log: Arc<dyn ErrorLog>,
        sampler: S,
    ) -> Result<(Self, UpdateDispatcher<QueueView>), EngineError>
    where
        S: MemorySampler + 'static,
    {
        options.validate().map_err(EngineError::InvalidOptions)?;

        let metrics = Arc::new(Metrics::new());
        let queue = Arc::new(TaskQueue::new(settings.clone()));
        let tick = settings.read(|s| s.update_tick());

        let mut housekeeping = Housekeeping::new(queue.clone(), metrics.clone());
        let mut memory_guard = MemoryGuard::new(sampler, settings, metrics.clone());
        let render_queue = queue.clone();

        let (bridge, dispatcher) = update_bridge::<QueueView>(tick, metrics.clone());
        let dispatcher = dispatcher.with_housekeeping(move |view: &mut QueueView| {
            if !housekeeping.run().is_empty() {
                view.invalidate();
            }
            memory_guard.check(view);
            if view.is_dirty() {
                view.render(&render_queue);
            }
        });

        tracing::info!(
            "Engine created: converter '{}', output {}",
            converter.name(),
            options.output_dir
        );

        Ok((
            Self {
                queue,
                converter,
                error_log,
                metrics,
                options,
                policy: RetryPolicy::default(),
                bridge,
                coordinator: ShutdownCoordinator::new(),
                worker: None,
            },
            dispatcher,
        ))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn settings(&self) -> &SettingsHandle {
        self.queue.settings()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    /// A bridge handle for posting interface updates from other threads.
    pub fn bridge(&self) -> UpdateBridge<QueueView> {
        self.bridge.clone()
    }

    /// Stop flag for [`UpdateDispatcher::run`], set by [`Engine::shutdown`].
    pub fn dispatcher_shutdown(&self) -> watch::Receiver<bool> {
        self.coordinator.dispatcher_receiver()
    }

    fn invalidate_view(&self) {
        self.bridge.request_update(|view| view.invalidate());
    }

    pub fn enqueue(&self, input: InputRef) -> Result<JobId, QueueError> {
        let id = self.queue.enqueue(input)?;
        self.invalidate_view();
        Ok(id)
    }

    pub fn enqueue_batch(&self, inputs: Vec<InputRef>) -> BatchOutcome {
        let outcome = self.queue.enqueue_batch(inputs);
        self.invalidate_view();
        outcome
    }

    /// Spawn the worker if it is not running and there is pending work.
    ///
    /// Returns whether a worker was started.
    pub fn start(&mut self) -> Result<bool, EngineError> {
        if self.coordinator.is_requested() {
            return Err(EngineError::ShutDown);
        }
        // The worker drops this flag only once no pending job is left, so a
        // job enqueued while it is set will still be picked up.
        if self.queue.is_worker_active() {
            tracing::debug!("Worker already running");
            return Ok(false);
        }
        if !self.queue.has_pending() {
            tracing::info!("No pending jobs, worker not started");
            return Ok(false);
        }

        // A released worker may still be exiting; joining it is short.
        if let Some(finished) = self.worker.take() {
            if finished.join().is_err() {
                tracing::error!("Previous worker thread panicked");
            }
        }

        let bridge = self.bridge.clone();
        let events = Arc::new(move |event: WorkerEvent| {
            tracing::trace!("Worker event: {:?}", event);
            bridge.request_update(|view: &mut QueueView| view.invalidate());
        });

        let worker = Worker::new(
            self.queue.clone(),
            self.converter.clone(),
            self.error_log.clone(),
            self.metrics.clone(),
            self.options.clone(),
            self.coordinator.cancel_receiver(),
        )
        .with_policy(self.policy)
        .with_events(events);

        self.worker = Some(worker.spawn()?);
        tracing::info!("Worker thread started");
        Ok(true)
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel one job; see [`TaskQueue::cancel`].
    pub fn cancel_job(&self, id: JobId) -> Result<JobStatus, QueueError> {
        let status = self.queue.cancel(id)?;
        self.invalidate_view();
        Ok(status)
    }

    pub fn remove_job(&self, id: JobId) -> Result<bool, QueueError> {
        let reclamped = self.queue.remove(id)?;
        self.invalidate_view();
        Ok(reclamped)
    }

    pub fn clear(&self) -> Result<(), QueueError> {
        self.queue.clear()?;
        self.invalidate_view();
        Ok(())
    }

    /// Cancel pending work, stop the dispatcher and wait (bounded) for the
    /// worker. Cached rendering state in `view` is released.
    pub fn shutdown(&mut self, view: Option<&mut QueueView>) -> ShutdownOutcome {
        let timeout = self.settings().read(|s| s.shutdown_timeout());
        let cached = view.map(|v| v as &mut dyn Reclaim);
        self.coordinator.shutdown(self.worker.take(), timeout, cached)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MockMemorySampler;
    use crate::models::EngineSettings;
    use crate::services::conversion::MockConverter;
    use crate::services::error_log::MemoryErrorLog;
    use std::thread;
    use std::time::{Duration, Instant};

    fn engine(converter: MockConverter) -> (Engine, UpdateDispatcher<QueueView>) {
        let mut sampler = MockMemorySampler::new();
        sampler.expect_sample().returning(|| Some(1024));
        Engine::with_sampler(
            SettingsHandle::new(EngineSettings::default()),
            ConversionOptions::default(),
            Arc::new(converter),
            Arc::new(MemoryErrorLog::new()),
            sampler,
        )
        .unwrap()
    }

    fn named_converter() -> MockConverter {
        let mut converter = MockConverter::new();
        converter.expect_name().return_const("mock".to_string());
        converter
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = ConversionOptions {
            lang: "xx".to_string(),
            ..ConversionOptions::default()
        };
        let result = Engine::new(
            SettingsHandle::default(),
            options,
            Arc::new(named_converter()),
            Arc::new(MemoryErrorLog::new()),
        );
        assert!(matches!(result, Err(EngineError::InvalidOptions(_))));
    }

    #[test]
    fn test_start_without_pending_jobs() {
        let (mut engine, _dispatcher) = engine(named_converter());
        assert!(!engine.start().unwrap());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_start_again_once_worker_released() {
        let (mut engine, _dispatcher) = engine(named_converter());
        let first = engine.enqueue(InputRef::new("/in/missing-a.pdf")).unwrap();
        assert!(engine.start().unwrap());

        let deadline = Instant::now() + Duration::from_secs(10);
        while engine.queue().is_worker_active() {
            assert!(Instant::now() < deadline, "worker did not drain");
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(engine.queue().get(first).unwrap().status, JobStatus::Failed);

        // The previous thread may not have exited yet.
        let second = engine.enqueue(InputRef::new("/in/missing-b.pdf")).unwrap();
        assert!(engine.start().unwrap());

        while engine.is_running() {
            assert!(Instant::now() < deadline, "worker did not stop");
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(engine.queue().get(second).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_start_after_shutdown_fails() {
        let (mut engine, _dispatcher) = engine(named_converter());
        assert_eq!(engine.shutdown(None), ShutdownOutcome::NotRunning);
        assert!(matches!(engine.start(), Err(EngineError::ShutDown)));
    }

    #[test]
    fn test_enqueue_posts_view_update() {
        let (engine, mut dispatcher) = engine(named_converter());
        engine.enqueue(InputRef::new("/in/a.pdf")).unwrap();

        let mut view = QueueView::new(50);
        view.render(engine.queue());
        assert_eq!(dispatcher.flush(&mut view), 1);
        assert!(!view.is_dirty());
        assert_eq!(view.visible_rows().len(), 1);
    }
}
