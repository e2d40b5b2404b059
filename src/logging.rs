// Logging - daily rotating log file plus an optional console layer
//
// The file layer records thread names so worker lines and interface lines
// can be told apart. `RUST_LOG` overrides the level picked from `debug`.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Where and how verbosely to log.
#[derive(Debug, Clone, Copy)]
pub struct LogOptions<'a> {
    pub dir: &'a Utf8Path,
    /// File name prefix; the appender adds the date
    pub prefix: &'a str,
    pub debug: bool,
    pub console: bool,
}

impl<'a> LogOptions<'a> {
    pub fn new(dir: &'a Utf8Path, prefix: &'a str) -> Self {
        Self {
            dir,
            prefix,
            debug: false,
            console: false,
        }
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    fn default_level(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_level()))
    }

    /// Install the global subscriber.
    ///
    /// The returned guard flushes the file writer on drop; the host keeps it
    /// alive until exit. Fails if a subscriber is already installed.
    pub fn init(self) -> Result<WorkerGuard> {
        fs::create_dir_all(self.dir)
            .with_context(|| format!("Failed to create log directory: {}", self.dir))?;

        let (writer, guard) = tracing_appender::non_blocking(rolling::daily(self.dir, self.prefix));

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true);

        let console_layer = self.console.then(|| {
            tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_target(false)
                .compact()
        });

        tracing_subscriber::registry()
            .with(self.filter())
            .with(file_layer)
            .with(console_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;

        tracing::info!(
            dir = %self.dir,
            prefix = self.prefix,
            debug = self.debug,
            console = self.console,
            "Logging initialized"
        );

        Ok(guard)
    }
}

/// File-only logging.
pub fn setup_logging(log_dir: &Utf8Path, log_prefix: &str, debug_mode: bool) -> Result<WorkerGuard> {
    LogOptions::new(log_dir, log_prefix).debug(debug_mode).init()
}

/// File logging plus, when `console_output` is set, a console layer.
pub fn setup_logging_with_console(
    log_dir: &Utf8Path,
    log_prefix: &str,
    debug_mode: bool,
    console_output: bool,
) -> Result<WorkerGuard> {
    LogOptions::new(log_dir, log_prefix)
        .debug(debug_mode)
        .console(console_output)
        .init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_options_builder() {
        let dir = Utf8PathBuf::from("logs");
        let options = LogOptions::new(&dir, "docqueue").debug(true).console(true);

        assert!(options.debug);
        assert!(options.console);
        assert_eq!(options.default_level(), "debug");
        assert_eq!(LogOptions::new(&dir, "docqueue").default_level(), "info");
    }

    #[test]
    fn test_init_creates_log_directory() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8PathBuf::try_from(temp.path().join("nested").join("logs")).unwrap();

        // Another test may have installed the global subscriber already;
        // the directory is created before that matters.
        let _ = setup_logging(&dir, "test", false);

        assert!(dir.is_dir());
    }
}
