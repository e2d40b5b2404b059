//! Data models for the conversion queue.
//!
//! - [`Job`]: one queued conversion request and its lifecycle state
//! - [`JobStatus`]: the job state machine
//! - [`ErrorCategory`] / [`JobError`]: closed failure taxonomy recorded on failed jobs
//! - [`UserConfig`]: engine, conversion and path settings loaded from `settings.yaml`
//!
//! Shared mutable state lives in [`TaskQueue`](crate::queue::TaskQueue); the
//! models here are plain data and carry no locks of their own.

pub mod config;
pub mod job;

pub use config::{
    ConversionOptions, EngineSettings, KNOWN_BACKENDS, KNOWN_LANGUAGES, ParseMethod,
    PathSettings, UserConfig,
};
pub use job::{DEFAULT_MAX_RETRIES, ErrorCategory, Job, JobError, JobId, JobStatus};
