use crate::models::{ConversionOptions, ErrorCategory, JobError, ParseMethod};
use crate::services::input::InputRef;
use camino::Utf8PathBuf;
use regex::Regex;
use std::fs;
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Tagged failure reported by a conversion collaborator.
///
/// Built once, where the failure is first observed, and carried unchanged
/// through the retry policy into the job record and the failure log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{category} error ({kind}): {message}")]
pub struct ConversionError {
    pub category: ErrorCategory,
    /// Exception-type label, e.g. `NotFound`, `timeout`, `RuntimeError`
    pub kind: String,
    pub message: String,
    retryable: bool,
}

impl ConversionError {
    pub fn new(category: ErrorCategory, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            kind: kind.into(),
            message: message.into(),
            retryable: category.is_retryable(),
        }
    }

    /// Missing input. An IO error, but retrying cannot help.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::new(ErrorCategory::Io, "NotFound", message)
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, "ValidationError", message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorCategory::Unknown,
            "timeout",
            format!("conversion timed out after {:?}", after),
        )
    }

    /// A collaborator panicked instead of returning an error.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, "panic", message)
    }

    /// Classify an I/O failure by its kind.
    pub fn from_io(err: &io::Error) -> Self {
        let kind = format!("{:?}", err.kind());
        let message = err.to_string();

        match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(message),
            io::ErrorKind::PermissionDenied => Self::new(ErrorCategory::Permission, kind, message),
            io::ErrorKind::OutOfMemory => Self::new(ErrorCategory::Memory, kind, message),
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable => Self::new(ErrorCategory::Network, kind, message),
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
                Self::new(ErrorCategory::Validation, kind, message)
            }
            _ => Self::new(ErrorCategory::Io, kind, message),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn to_job_error(&self) -> JobError {
        JobError {
            category: self.category,
            message: self.message.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl From<io::Error> for ConversionError {
    fn from(err: io::Error) -> Self {
        Self::from_io(&err)
    }
}

/// Which optional recognizers the pipeline should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub formula: bool,
    pub table: bool,
}

/// Zero-based page range; `end` is inclusive and open when `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageRange {
    pub start: u32,
    pub end: Option<u32>,
}

/// Everything a converter needs for one attempt at one job.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub output_dir: Utf8PathBuf,
    pub input_name: String,
    pub input_path: Utf8PathBuf,
    /// Read fresh for every attempt
    pub input_bytes: Vec<u8>,
    pub lang: String,
    pub parse_method: ParseMethod,
    pub backend: String,
    pub features: FeatureFlags,
    pub page_range: PageRange,
    pub device_mode: Option<String>,
    pub timeout: Option<Duration>,
}

impl ConversionRequest {
    /// Read the input and assemble a request from the current options.
    pub fn prepare(
        options: &ConversionOptions,
        input: &InputRef,
        timeout: Option<Duration>,
    ) -> Result<Self, ConversionError> {
        let input_bytes = fs::read(&input.path).map_err(|e| ConversionError::from_io(&e))?;
        if input_bytes.is_empty() {
            return Err(ConversionError::validation(format!(
                "input file is empty: {}",
                input.path
            )));
        }

        Ok(Self {
            output_dir: options.output_dir.clone(),
            input_name: input.display_name.clone(),
            input_path: input.path.clone(),
            input_bytes,
            lang: options.lang.clone(),
            parse_method: options.parse_method,
            backend: options.backend.clone(),
            features: FeatureFlags {
                formula: options.formula_enable,
                table: options.table_enable,
            },
            page_range: PageRange {
                start: options.start_page,
                end: options.end_page,
            },
            device_mode: options.device_mode.clone(),
            timeout,
        })
    }
}

/// The external document-conversion pipeline.
///
/// Calls are synchronous and may block for a long time; the worker never
/// interrupts one once started.
#[cfg_attr(test, mockall::automock)]
pub trait Converter: Send + Sync {
    /// Returns the name of this converter implementation.
    fn name(&self) -> &str;

    /// Convert one document into `request.output_dir`.
    fn convert(&self, request: &ConversionRequest) -> Result<(), ConversionError>;
}

/// Runs the conversion pipeline's command-line entry point as a subprocess.
///
/// Non-zero exits are classified from the captured stderr into a
/// [`ConversionError`] before leaving this adapter.
pub struct CommandConverter {
    program: String,
    rules: Vec<(Regex, ErrorCategory)>,
    exception_pattern: Regex,
}

impl CommandConverter {
    /// Create a converter invoking `program` (e.g. `mineru`).
    pub fn new(program: impl Into<String>) -> Self {
        let rule = |pattern: &str, category| {
            (
                Regex::new(pattern).expect("Invalid classification regex"),
                category,
            )
        };

        Self {
            program: program.into(),
            rules: vec![
                rule(r"(?i)out of memory|MemoryError|cannot allocate", ErrorCategory::Memory),
                rule(r"(?i)permission denied|PermissionError", ErrorCategory::Permission),
                rule(
                    r"(?i)connection (refused|reset|aborted)|timed out|HTTPError|URLError|network",
                    ErrorCategory::Network,
                ),
                rule(
                    r"(?i)model (not found|load)|weights|checkpoint|models-dir",
                    ErrorCategory::Model,
                ),
                rule(
                    r"(?i)config(uration)? (error|missing)|MINERU_TOOLS_CONFIG_JSON",
                    ErrorCategory::Configuration,
                ),
                rule(
                    r"(?i)invalid|ValueError|unsupported|corrupt|PdfiumError",
                    ErrorCategory::Validation,
                ),
                rule(r"(?i)FileNotFoundError|No such file", ErrorCategory::Io),
            ],
            exception_pattern: Regex::new(r"(\w+(?:Error|Exception))\b")
                .expect("Invalid exception regex"),
        }
    }

    /// Build the argument list for one request.
    pub fn build_args(&self, request: &ConversionRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            request.input_path.to_string(),
            "-o".to_string(),
            request.output_dir.to_string(),
            "-m".to_string(),
            request.parse_method.to_string(),
            "-b".to_string(),
            request.backend.clone(),
            "-l".to_string(),
            request.lang.clone(),
            "-f".to_string(),
            request.features.formula.to_string(),
            "-t".to_string(),
            request.features.table.to_string(),
            "-s".to_string(),
            request.page_range.start.to_string(),
        ];

        if let Some(end) = request.page_range.end {
            args.push("-e".to_string());
            args.push(end.to_string());
        }

        args
    }

    /// Turn a failed run into a tagged error from its exit code and stderr.
    pub fn classify_failure(&self, exit_code: Option<i32>, stderr: &str) -> ConversionError {
        let kind = self
            .exception_pattern
            .captures_iter(stderr)
            .last()
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| match exit_code {
                Some(code) => format!("exit {}", code),
                None => "terminated".to_string(),
            });

        let message = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("conversion process failed")
            .trim()
            .chars()
            .take(200)
            .collect::<String>();

        // The raised exception decides; traceback source lines only count
        // when the exception line itself matches no rule.
        let category = stderr
            .lines()
            .rev()
            .find(|line| self.exception_pattern.is_match(line))
            .and_then(|line| self.match_rules(line))
            .or_else(|| self.match_rules(stderr))
            .unwrap_or(ErrorCategory::Unknown);

        if category == ErrorCategory::Io && kind.contains("FileNotFound") {
            return ConversionError {
                kind,
                ..ConversionError::not_found(message)
            };
        }

        ConversionError::new(category, kind, message)
    }

    fn match_rules(&self, text: &str) -> Option<ErrorCategory> {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.is_match(text))
            .map(|(_, category)| *category)
    }

    async fn run(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let args = self.build_args(request);
        tracing::info!("Executing: {} {}", self.program, args.join(" "));

        let start = Instant::now();

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(device) = &request.device_mode {
            cmd.env("MINERU_DEVICE_MODE", device);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ConversionError::new(
                    ErrorCategory::Configuration,
                    "NotFound",
                    format!("converter executable not found: {}", self.program),
                )
            } else {
                ConversionError::from_io(&e)
            }
        })?;

        let output = match request.timeout {
            Some(limit) => timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    tracing::warn!("Conversion process timed out after {:?}", limit);
                    ConversionError::timeout(limit)
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| ConversionError::from_io(&e))?;

        tracing::info!(
            "Conversion process finished in {:.2}s with status {}",
            start.elapsed().as_secs_f32(),
            output.status
        );

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(self.classify_failure(output.status.code(), &stderr))
        }
    }
}

impl Converter for CommandConverter {
    fn name(&self) -> &str {
        &self.program
    }

    /// Blocks the calling thread; must not be called from inside a tokio runtime.
    fn convert(&self, request: &ConversionRequest) -> Result<(), ConversionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ConversionError::from_io(&e))?;
        runtime.block_on(self.run(request))
    }
}
