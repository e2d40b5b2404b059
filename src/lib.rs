// docqueue - sequential background queue engine for document conversion
//
// This is the library crate containing the queue engine and its collaborators.
// The binary crate (main.rs) provides a command-line host.

pub mod config;
pub mod engine;
pub mod housekeeping;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod services;
pub mod shutdown;
pub mod ui;
pub mod worker;

// Re-export commonly used types for convenience
pub use config::{ConfigManager, SettingsHandle};
pub use engine::{Engine, EngineError};
pub use models::{ConversionOptions, EngineSettings, Job, JobId, JobStatus, UserConfig};
pub use queue::{QueueError, TaskQueue};
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
