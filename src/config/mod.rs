use crate::models::{EngineSettings, UserConfig};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::sync::{Arc, PoisonError, RwLock};

/// File name of the user settings inside the config directory.
pub const SETTINGS_FILE: &str = "settings.yaml";

/// Prefix for environment overrides, e.g. `DOCQUEUE_ENGINE__MAX_QUEUE_SIZE=100`.
pub const ENV_PREFIX: &str = "DOCQUEUE";

/// Configuration manager for loading and saving the YAML settings file.
///
/// Loading layers the optional `settings.yaml` under `DOCQUEUE_*`
/// environment variables; saving writes the plain YAML file back.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Manage `settings.yaml` inside `config_dir`, creating the directory
    /// if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Cannot create settings directory {}", config_dir))?;

        Ok(Self {
            settings_path: config_dir.join(SETTINGS_FILE),
            config_dir,
        })
    }

    /// Load the user configuration.
    ///
    /// # Returns
    /// The merged UserConfig; defaults fill anything the file and environment omit
    pub fn load_user_config(&self) -> Result<UserConfig> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
        }

        let settings = config::Config::builder()
            .add_source(
                config::File::new(self.settings_path.as_str(), config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?;

        let config: UserConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::info!("Loaded settings from {}", self.settings_path);
        Ok(config)
    }

    /// Write `config` to `settings.yaml`, replacing the file.
    pub fn save_user_config(&self, config: &UserConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }
}

/// Shared, runtime-adjustable engine settings.
///
/// Cloning the handle shares the same settings. Readers take a short read
/// lock per call and never cache values across decisions.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<EngineSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Copy of the current settings.
    pub fn snapshot(&self) -> EngineSettings {
        self.read(|s| s.clone())
    }

    /// Read one or more values under a short read lock, e.g.
    /// `settings.read(|s| s.max_queue_size)`.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&EngineSettings) -> R,
    {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Mutate the settings in place. Takes effect at the next decision point.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut EngineSettings),
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
        tracing::debug!("Engine settings updated: {:?}", *guard);
    }
}
