//! End-to-end engine tests with in-process converters
//!
//! These tests verify that the Engine correctly:
//! - Applies backpressure at the configured queue capacity
//! - Fails non-retryable errors immediately and records them once
//! - Retries transient failures and completes without an error record
//! - Cancels pending jobs on shutdown while the in-flight job finishes

use camino::Utf8PathBuf;
use docqueue::memory::MemorySampler;
use docqueue::models::{ErrorCategory, JobStatus};
use docqueue::services::conversion::{ConversionError, ConversionRequest, Converter};
use docqueue::services::error_log::MemoryErrorLog;
use docqueue::services::input::InputRef;
use docqueue::services::retry::RetryPolicy;
use docqueue::shutdown::ShutdownOutcome;
use docqueue::ui::{QueueView, UpdateDispatcher};
use docqueue::worker::StopReason;
use docqueue::{ConversionOptions, Engine, EngineSettings, QueueError, SettingsHandle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct FixedSampler;

impl MemorySampler for FixedSampler {
    fn sample(&mut self) -> Option<u64> {
        Some(64 * 1024 * 1024)
    }
}

/// Fails with the given categories in order, then succeeds.
struct ScriptedConverter {
    failures: Vec<ErrorCategory>,
    calls: AtomicU32,
}

impl ScriptedConverter {
    fn new(failures: Vec<ErrorCategory>) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }
}

impl Converter for ScriptedConverter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn convert(&self, _request: &ConversionRequest) -> Result<(), ConversionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        match self.failures.get(call) {
            Some(category) => Err(ConversionError::new(*category, "Scripted", "scripted failure")),
            None => Ok(()),
        }
    }
}

/// Blocks every conversion until the test releases it.
struct GatedConverter {
    started: Mutex<mpsc::Sender<String>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Converter for GatedConverter {
    fn name(&self) -> &str {
        "gated"
    }

    fn convert(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let _ = self.started.lock().unwrap().send(request.input_name.clone());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10));
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    inputs: Vec<InputRef>,
    engine: Engine,
    _dispatcher: UpdateDispatcher<QueueView>,
    error_log: Arc<MemoryErrorLog>,
}

fn harness(files: usize, settings: EngineSettings, converter: Arc<dyn Converter>) -> Harness {
    let dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

    let inputs = (0..files)
        .map(|i| {
            let path = root.join(format!("doc{}.pdf", i));
            std::fs::write(&path, b"%PDF-1.4\n/Type /Page\n%%EOF").unwrap();
            InputRef::new(path)
        })
        .collect();

    let options = ConversionOptions {
        output_dir: root.join("out"),
        ..ConversionOptions::default()
    };
    let error_log = Arc::new(MemoryErrorLog::new());

    let (engine, dispatcher) = Engine::with_sampler(
        SettingsHandle::new(settings),
        options,
        converter,
        error_log.clone(),
        FixedSampler,
    )
    .unwrap();

    Harness {
        _dir: dir,
        inputs,
        engine: engine.with_retry_policy(RetryPolicy::new(
            Duration::from_millis(5),
            Duration::from_millis(20),
        )),
        _dispatcher: dispatcher,
        error_log,
    }
}

fn wait_until_stopped(engine: &Engine) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.is_running() {
        assert!(Instant::now() < deadline, "worker did not stop in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_backpressure_rejects_beyond_capacity() {
    let settings = EngineSettings {
        max_queue_size: 2,
        ..EngineSettings::default()
    };
    let h = harness(3, settings, Arc::new(ScriptedConverter::new(vec![])));

    assert!(h.engine.enqueue(h.inputs[0].clone()).is_ok());
    assert!(h.engine.enqueue(h.inputs[1].clone()).is_ok());
    assert!(matches!(
        h.engine.enqueue(h.inputs[2].clone()),
        Err(QueueError::Backpressure { capacity: 2 })
    ));
    assert_eq!(h.engine.queue().len(), 2);
}

#[test]
fn test_validation_failure_is_not_retried() {
    let converter = Arc::new(ScriptedConverter::new(vec![ErrorCategory::Validation]));
    let mut h = harness(1, EngineSettings::default(), converter.clone());

    let id = h.engine.enqueue(h.inputs[0].clone()).unwrap();
    assert!(h.engine.start().unwrap());
    wait_until_stopped(&h.engine);

    let job = h.engine.queue().get(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.error.as_ref().unwrap().category, ErrorCategory::Validation);
    assert_eq!(converter.calls.load(Ordering::SeqCst), 1);

    let records = h.error_log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, ErrorCategory::Validation);

    assert_eq!(
        h.engine.shutdown(None),
        ShutdownOutcome::Joined(StopReason::Drained)
    );
}

#[test]
fn test_transient_failures_retried_until_success() {
    let settings = EngineSettings {
        max_retries: 3,
        ..EngineSettings::default()
    };
    let converter = Arc::new(ScriptedConverter::new(vec![
        ErrorCategory::Network,
        ErrorCategory::Network,
    ]));
    let mut h = harness(1, settings, converter.clone());

    let id = h.engine.enqueue(h.inputs[0].clone()).unwrap();
    h.engine.start().unwrap();
    wait_until_stopped(&h.engine);

    let job = h.engine.queue().get(id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 2);
    assert!(job.error.is_none());
    assert!(h.error_log.is_empty());
    assert_eq!(converter.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_jobs_processed_in_enqueue_order() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let converter = Arc::new(GatedConverter {
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    });
    let mut h = harness(3, EngineSettings::default(), converter);

    let outcome = h.engine.enqueue_batch(h.inputs.clone());
    assert_eq!(outcome.accepted.len(), 3);
    for _ in 0..3 {
        release_tx.send(()).unwrap();
    }
    h.engine.start().unwrap();
    wait_until_stopped(&h.engine);

    let order: Vec<String> = started_rx.try_iter().collect();
    assert_eq!(order, vec!["doc0", "doc1", "doc2"]);

    let stats = h.engine.queue().stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.pending, 0);
}

#[test]
fn test_shutdown_cancels_pending_and_finishes_in_flight() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let converter = Arc::new(GatedConverter {
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    });
    let mut h = harness(3, EngineSettings::default(), converter);

    h.engine.enqueue_batch(h.inputs.clone());
    h.engine.start().unwrap();

    let first = started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first, "doc0");
    assert_eq!(h.engine.queue().stats().processing, 1);

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        release_tx.send(()).unwrap();
    });

    let outcome = h.engine.shutdown(None);
    releaser.join().unwrap();

    assert_eq!(outcome, ShutdownOutcome::Joined(StopReason::Cancelled));
    let stats = h.engine.queue().stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.cancelled, 2);
    assert_eq!(stats.pending, 0);
    assert!(!h.engine.queue().is_worker_active());
    assert!(started_rx.try_recv().is_err());
}

#[test]
fn test_clear_refused_while_worker_active() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let converter = Arc::new(GatedConverter {
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    });
    let mut h = harness(1, EngineSettings::default(), converter);

    h.engine.enqueue(h.inputs[0].clone()).unwrap();
    h.engine.start().unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert!(matches!(h.engine.clear(), Err(QueueError::WorkerActive)));

    release_tx.send(()).unwrap();
    wait_until_stopped(&h.engine);
    h.engine.shutdown(None);

    assert!(h.engine.clear().is_ok());
    assert!(h.engine.queue().is_empty());
}
