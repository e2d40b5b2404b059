//! Services module - collaborators consumed by the queue engine.
//!
//! Nothing here knows about threads or the queue lock; the [`Worker`](crate::worker)
//! drives these on its own thread.
//!
//! # Components
//!
//! - [`input`]: turning file/folder selections into [`InputRef`]s, plus the
//!   windowed [`FileList`] of selected inputs
//! - [`conversion`]: the [`Converter`] seam, the tagged [`ConversionError`]
//!   and the subprocess-backed [`CommandConverter`]
//! - [`retry`]: the [`RetryPolicy`] applied to failed attempts
//! - [`error_log`]: the append-only record of permanently failed jobs
//! - [`metadata`]: best-effort page counts for timing statistics
//!
//! # Error classification
//!
//! Failures are tagged with an [`ErrorCategory`](crate::models::ErrorCategory)
//! at the point they are first observed (I/O kind, exit status, stderr of the
//! subprocess). Everything downstream matches on the category, never on text.

pub mod conversion;
pub mod error_log;
pub mod input;
pub mod metadata;
pub mod retry;

pub use conversion::{
    CommandConverter, ConversionError, ConversionRequest, Converter, FeatureFlags, PageRange,
};
pub use error_log::{ErrorLog, ErrorRecord, FileErrorLog, MemoryErrorLog};
pub use input::{FileList, InputRef, InputSelection, collect_inputs};
pub use metadata::estimate_unit_count;
pub use retry::{RetryDecision, RetryPolicy};
