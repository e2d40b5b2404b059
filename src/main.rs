//! docqueue - batch document conversion through a sequential background queue
//!
//! Command line host for the [`Engine`].
//!
//! # Overview
//!
//! The binary loads `settings.yaml`, expands the given files and folders into
//! conversion inputs, enqueues them and runs the worker until the queue is
//! drained or the user interrupts with Ctrl+C. It initializes:
//! - Logging infrastructure (daily file rotation + console output)
//! - Configuration loading ([`ConfigManager`]) with command line overrides
//! - The engine, its command-line converter and the failure log
//!
//! Threading model:
//! - **Main thread**: current-thread tokio runtime driving the update
//!   dispatcher, the Ctrl+C handler and a completion poll
//! - **Worker thread**: spawned by the engine, converts one job at a time
//!
//! # Execution Flow
//!
//! 1. Load `<config-dir>/settings.yaml` (+ `DOCQUEUE_*` environment overrides)
//! 2. Initialize logging → `<log_dir>/docqueue.<date>`
//! 3. Apply command line overrides and validate conversion options
//! 4. Collect inputs, enqueue them, start the worker
//! 5. Dispatch interface updates until the worker stops or Ctrl+C
//! 6. Shut down with a bounded wait and log the run summary
//!
//! # Exit
//!
//! Ctrl+C cancels every pending job; the job being converted finishes first
//! unless the shutdown timeout elapses.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use docqueue::models::ParseMethod;
use docqueue::services::conversion::CommandConverter;
use docqueue::services::error_log::FileErrorLog;
use docqueue::services::input::{FileList, collect_inputs};
use docqueue::ui::QueueView;
use docqueue::{APP_NAME, ConfigManager, Engine, SettingsHandle, VERSION};
use std::sync::Arc;
use std::time::Duration;

const COMPLETION_POLL: Duration = Duration::from_millis(200);
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "docqueue", version, about = "Convert PDF and image documents in a background queue")]
struct Cli {
    /// Directory holding settings.yaml
    #[arg(long, default_value = "config")]
    config_dir: Utf8PathBuf,

    /// Output directory (overrides settings)
    #[arg(short, long)]
    output: Option<Utf8PathBuf>,

    /// Document language (overrides settings)
    #[arg(short, long)]
    lang: Option<String>,

    /// Parse method: auto, txt or ocr (overrides settings)
    #[arg(short, long)]
    method: Option<ParseMethod>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Files or folders to convert
    #[arg(required = true)]
    paths: Vec<Utf8PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let mut user_config = config_manager.load_user_config()?;

    let _log_guard = docqueue::logging::setup_logging_with_console(
        &user_config.paths.log_dir,
        "docqueue",
        cli.debug,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let options = &mut user_config.conversion;
    if let Some(output) = cli.output {
        options.output_dir = output;
    }
    if let Some(lang) = cli.lang {
        options.lang = lang;
    }
    if let Some(method) = cli.method {
        options.parse_method = method;
    }

    let settings = SettingsHandle::new(user_config.engine.clone());
    let converter = Arc::new(CommandConverter::new(user_config.conversion.command.clone()));
    let error_log = Arc::new(FileErrorLog::new(user_config.paths.error_log.clone()));

    let (mut engine, dispatcher) = Engine::new(
        settings.clone(),
        user_config.conversion.clone(),
        converter,
        error_log,
    )
    .context("Invalid conversion settings")?;

    let selection = collect_inputs(&cli.paths);
    let files = FileList::new(settings.read(|s| s.file_window_size));
    files.replace(selection.accepted);
    if files.is_empty() {
        tracing::warn!("No supported input files found, nothing to do");
        return Ok(());
    }

    let outcome = engine.enqueue_batch(files.take_all());
    for input in &outcome.rejected {
        tracing::warn!("Not queued (queue full): {}", input.path);
    }

    engine.start()?;

    let mut view = QueueView::new(settings.read(|s| s.job_window_size));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let interrupted = runtime.block_on(async {
        let dispatch = dispatcher.run(&mut view, engine.dispatcher_shutdown());
        tokio::pin!(dispatch);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut poll = tokio::time::interval(COMPLETION_POLL);
        let mut progress = tokio::time::interval(PROGRESS_LOG_INTERVAL);
        progress.tick().await;

        loop {
            tokio::select! {
                _ = &mut dispatch => break false,
                signal = &mut ctrl_c => {
                    if let Err(e) = signal {
                        tracing::error!("Failed to listen for Ctrl+C: {}", e);
                    }
                    tracing::warn!("Interrupted, cancelling pending jobs");
                    break true;
                }
                _ = poll.tick() => {
                    if !engine.is_running() {
                        break false;
                    }
                }
                _ = progress.tick() => {
                    engine.metrics().log_periodic(&engine.queue().summary());
                }
            }
        }
    });

    view.render(engine.queue());
    tracing::info!("{}", view.info_line());

    let shutdown = engine.shutdown(Some(&mut view));
    tracing::debug!("Engine shutdown: {:?} (interrupted: {})", shutdown, interrupted);

    engine.metrics().log_summary();
    let summary = engine.queue().summary();
    tracing::info!(
        "Run finished: {} completed, {} failed, {} cancelled of {} ({:.1} units/min)",
        summary.completed,
        summary.failed,
        summary.cancelled,
        summary.total,
        summary.units_per_minute()
    );

    runtime.shutdown_timeout(Duration::from_secs(1));
    Ok(())
}
