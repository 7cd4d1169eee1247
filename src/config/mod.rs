// Configuration module

mod models;

pub use models::*;

use crate::error::{Result, SynthError};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (`SYNTHGATE_CACHE__TTL_SECS=60`)
    /// 2. Config file (`path`, or `~/.synthgate/config.toml` when absent)
    /// 3. Defaults (lowest)
    ///
    /// The result is validated; any violation is a fatal `CONFIG_INVALID`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(&Self::default_config_path()).required(false),
        };

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            .add_source(file)
            // Override with environment variables (prefix: SYNTHGATE_)
            .add_source(
                Environment::with_prefix("SYNTHGATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Reject settings no component can operate under.
    pub fn validate(&self) -> Result<()> {
        let admission = &self.admission;
        if admission.max_concurrent == 0 {
            return Err(SynthError::config_invalid(
                "admission.max_concurrent",
                "max_concurrent must be at least 1",
            ));
        }
        if admission.min_limit == 0 {
            return Err(SynthError::config_invalid(
                "admission.min_limit",
                "min_limit must be at least 1",
            ));
        }
        let max_limit = admission.effective_max_limit();
        if admission.min_limit > max_limit {
            return Err(SynthError::config_invalid(
                "admission.max_limit",
                format!(
                    "min_limit {} exceeds max_limit {}",
                    admission.min_limit, max_limit
                ),
            ));
        }
        if !(admission.min_limit..=max_limit).contains(&admission.max_concurrent) {
            return Err(SynthError::config_invalid(
                "admission.max_concurrent",
                format!(
                    "max_concurrent {} outside [{}, {}]",
                    admission.max_concurrent, admission.min_limit, max_limit
                ),
            ));
        }

        let cache = &self.cache;
        if cache.ttl_secs == 0 {
            return Err(SynthError::config_invalid("cache.ttl_secs", "ttl must be positive"));
        }
        if cache.max_items == 0 {
            return Err(SynthError::config_invalid(
                "cache.max_items",
                "max_items must be at least 1",
            ));
        }
        if cache.max_item_size_mb > cache.max_size_mb {
            return Err(SynthError::config_invalid(
                "cache.max_item_size_mb",
                "a single item may not exceed the total cache size",
            ));
        }

        if self.worker.command.trim().is_empty() {
            return Err(SynthError::config_invalid(
                "worker.command",
                "worker command is empty",
            ));
        }
        if self.worker.exec_timeout_secs == 0 || self.worker.start_timeout_secs == 0 {
            return Err(SynthError::config_invalid(
                "worker.exec_timeout_secs",
                "worker timeouts must be positive",
            ));
        }
        if self.monitor.reaper_interval_ms == 0 {
            return Err(SynthError::config_invalid(
                "monitor.reaper_interval_ms",
                "reaper interval must be positive",
            ));
        }
        if self.errors.history_capacity == 0 {
            return Err(SynthError::config_invalid(
                "errors.history_capacity",
                "error history needs room for at least one entry",
            ));
        }

        Ok(())
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".synthgate")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}
