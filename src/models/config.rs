use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Language codes understood by the conversion pipeline's OCR stage.
pub const KNOWN_LANGUAGES: &[&str] = &[
    "ch",
    "ch_server",
    "ch_lite",
    "en",
    "korean",
    "japan",
    "chinese_cht",
    "ta",
    "te",
    "ka",
    "th",
    "el",
    "latin",
    "arabic",
    "east_slavic",
    "cyrillic",
    "devanagari",
];

/// Backends the conversion pipeline can run locally.
pub const KNOWN_BACKENDS: &[&str] = &["pipeline"];

/// User configuration from `settings.yaml`.
///
/// Contains engine tuning, conversion options and file locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub conversion: ConversionOptions,

    #[serde(default)]
    pub paths: PathSettings,
}

/// Runtime-adjustable engine settings.
///
/// These are held behind a [`SettingsHandle`](crate::config::SettingsHandle)
/// and re-read at every decision point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_retained_completed_count")]
    pub retained_completed_count: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_memory_threshold_bytes")]
    pub memory_threshold_bytes: u64,

    #[serde(default = "default_memory_check_interval_secs")]
    pub memory_check_interval_secs: u64,

    #[serde(default = "default_true")]
    pub memory_monitor_enabled: bool,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// No timeout when unset; a hung conversion then blocks the worker.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,

    #[serde(default = "default_update_tick_ms")]
    pub update_tick_ms: u64,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    #[serde(default = "default_job_window_size")]
    pub job_window_size: usize,

    #[serde(default = "default_file_window_size")]
    pub file_window_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            retained_completed_count: default_retained_completed_count(),
            max_retries: default_max_retries(),
            memory_threshold_bytes: default_memory_threshold_bytes(),
            memory_check_interval_secs: default_memory_check_interval_secs(),
            memory_monitor_enabled: true,
            cleanup_interval_secs: default_cleanup_interval_secs(),
            job_timeout_secs: None,
            update_tick_ms: default_update_tick_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            job_window_size: default_job_window_size(),
            file_window_size: default_file_window_size(),
        }
    }
}

impl EngineSettings {
    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_secs(self.memory_check_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn update_tick(&self) -> Duration {
        Duration::from_millis(self.update_tick_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// How the pipeline should extract content from a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMethod {
    #[default]
    Auto,
    Txt,
    Ocr,
}

impl ParseMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Txt => "txt",
            Self::Ocr => "ocr",
        }
    }
}

impl fmt::Display for ParseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ParseMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "txt" => Ok(Self::Txt),
            "ocr" => Ok(Self::Ocr),
            other => Err(format!("unknown parse method: {}", other)),
        }
    }
}

/// Options forwarded to the conversion collaborator for every job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionOptions {
    #[serde(default = "default_output_dir")]
    pub output_dir: Utf8PathBuf,

    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub parse_method: ParseMethod,

    #[serde(default = "default_lang")]
    pub lang: String,

    #[serde(default = "default_true")]
    pub formula_enable: bool,

    #[serde(default = "default_true")]
    pub table_enable: bool,

    #[serde(default)]
    pub start_page: u32,

    #[serde(default)]
    pub end_page: Option<u32>,

    /// Forwarded to the pipeline as `MINERU_DEVICE_MODE` (e.g. `cpu`, `cuda`)
    #[serde(default)]
    pub device_mode: Option<String>,

    /// Executable used by the command-line converter
    #[serde(default = "default_command")]
    pub command: String,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            backend: default_backend(),
            parse_method: ParseMethod::Auto,
            lang: default_lang(),
            formula_enable: true,
            table_enable: true,
            start_page: 0,
            end_page: None,
            device_mode: None,
            command: default_command(),
        }
    }
}

impl ConversionOptions {
    /// Check option values before any job is handed to the converter.
    pub fn validate(&self) -> Result<(), String> {
        if !KNOWN_LANGUAGES.contains(&self.lang.as_str()) {
            return Err(format!("unsupported language: {}", self.lang));
        }
        if !KNOWN_BACKENDS.contains(&self.backend.as_str()) {
            return Err(format!("unsupported backend: {}", self.backend));
        }
        if let Some(end) = self.end_page {
            if end < self.start_page {
                return Err(format!(
                    "end page {} is before start page {}",
                    end, self.start_page
                ));
            }
        }
        if self.command.trim().is_empty() {
            return Err("converter command is empty".to_string());
        }
        Ok(())
    }
}

/// File locations used by the host application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathSettings {
    #[serde(default = "default_log_dir")]
    pub log_dir: Utf8PathBuf,

    /// Append-only record of permanently failed jobs
    #[serde(default = "default_error_log")]
    pub error_log: Utf8PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            error_log: default_error_log(),
        }
    }
}

fn default_max_queue_size() -> usize {
    2000
}

fn default_retained_completed_count() -> usize {
    500
}

fn default_max_retries() -> u32 {
    crate::models::job::DEFAULT_MAX_RETRIES
}

fn default_memory_threshold_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_memory_check_interval_secs() -> u64 {
    30
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_update_tick_ms() -> u64 {
    50
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_job_window_size() -> usize {
    50
}

fn default_file_window_size() -> usize {
    30
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("output")
}

fn default_backend() -> String {
    "pipeline".to_string()
}

fn default_lang() -> String {
    "ch".to_string()
}

fn default_command() -> String {
    "mineru".to_string()
}

fn default_log_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("logs")
}

fn default_error_log() -> Utf8PathBuf {
    Utf8PathBuf::from("logs/failed_jobs.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_settings_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.max_queue_size, 2000);
        assert_eq!(settings.retained_completed_count, 500);
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.memory_check_interval(), Duration::from_secs(30));
        assert_eq!(settings.update_tick(), Duration::from_millis(50));
        assert_eq!(settings.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(settings.job_timeout(), None);
        assert_eq!(settings.job_window_size, 50);
        assert_eq!(settings.file_window_size, 30);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "engine:\n  max_queue_size: 10\nconversion:\n  lang: en\n";
        let config: UserConfig = serde_yaml_ng::from_str(yaml).unwrap();

        assert_eq!(config.engine.max_queue_size, 10);
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.conversion.lang, "en");
        assert_eq!(config.conversion.parse_method, ParseMethod::Auto);
        assert_eq!(config.paths.log_dir, Utf8PathBuf::from("logs"));
    }

    #[test]
    fn test_parse_method_round_trip_names() {
        assert_eq!("OCR".parse::<ParseMethod>().unwrap(), ParseMethod::Ocr);
        assert_eq!(ParseMethod::Txt.to_string(), "txt");
        assert!("vlm".parse::<ParseMethod>().is_err());
    }

    #[test]
    fn test_conversion_options_validation() {
        let mut options = ConversionOptions::default();
        assert!(options.validate().is_ok());

        options.lang = "klingon".to_string();
        assert!(options.validate().is_err());

        options.lang = "en".to_string();
        options.start_page = 5;
        options.end_page = Some(2);
        assert!(options.validate().is_err());
    }
}
