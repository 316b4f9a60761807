//! Configuration file model
//!
//! A config file has two sections, `[executor]` and `[bus]`. Missing sections
//! and fields fall back to their defaults, so an empty file is valid.

use crate::error::{SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tash_core::MessageBusConfig;
use tash_process::{ExecutorConfig, ListConfig};

/// How tasks are run and listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Task runner executable
    pub program: String,
    /// Arguments placed before the task id
    pub base_args: Vec<String>,
    /// Arguments that make the runner print its task list as JSON
    pub list_args: Vec<String>,
    /// Working directory for task processes; inherited when unset
    pub working_dir: Option<PathBuf>,
    /// Grace period after a failed cancellation signal before the child is killed
    pub cancel_grace_ms: u64,
    /// How long output is drained after the process exits
    pub drain_timeout_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            program: "task".to_string(),
            base_args: Vec::new(),
            list_args: vec!["--list-all".to_string(), "--json".to_string()],
            working_dir: None,
            cancel_grace_ms: 5000,
            drain_timeout_ms: 2000,
        }
    }
}

/// Message bus tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Per-subscriber delivery timeout
    pub delivery_timeout_ms: u64,
    /// Buffer size of consumer handlers
    pub handler_capacity: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 5000,
            handler_capacity: 4096,
        }
    }
}

/// Complete Tash configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub bus: BusSettings,
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(SettingsError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

impl Config {
    /// Create default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from a `.json` or `.toml` file
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to a `.json` or `.toml` file
    ///
    /// Parent directories are created as needed.
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        tracing::debug!("saved config to {}", path.display());
        Ok(())
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Default config file location: `<config dir>/tash/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("tash").join("config.toml"))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no configuration directory on this platform".to_string())
            })
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.executor.program.trim().is_empty() {
            return Err(SettingsError::invalid("executor.program", "must not be empty"));
        }

        if self.executor.cancel_grace_ms == 0 {
            return Err(SettingsError::invalid("executor.cancel_grace_ms", "must be > 0"));
        }

        if self.executor.drain_timeout_ms == 0 {
            return Err(SettingsError::invalid("executor.drain_timeout_ms", "must be > 0"));
        }

        if self.bus.delivery_timeout_ms == 0 {
            return Err(SettingsError::invalid("bus.delivery_timeout_ms", "must be > 0"));
        }

        if self.bus.handler_capacity == 0 {
            return Err(SettingsError::invalid("bus.handler_capacity", "must be > 0"));
        }

        Ok(())
    }

    /// Message bus configuration
    pub fn bus_config(&self) -> MessageBusConfig {
        MessageBusConfig {
            delivery_timeout: Duration::from_millis(self.bus.delivery_timeout_ms),
        }
    }

    /// Task executor configuration
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            program: self.executor.program.clone(),
            base_args: self.executor.base_args.clone(),
            current_dir: self.executor.working_dir.clone(),
            cancel_grace: Duration::from_millis(self.executor.cancel_grace_ms),
            drain_timeout: Duration::from_millis(self.executor.drain_timeout_ms),
        }
    }

    /// Task lister configuration
    pub fn list_config(&self) -> ListConfig {
        ListConfig {
            program: self.executor.program.clone(),
            args: self.executor.list_args.clone(),
            current_dir: self.executor.working_dir.clone(),
        }
    }
}
