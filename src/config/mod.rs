//! Engine configuration
//!
//! Settings are read from a TOML file in the platform config directory:
//!
//! - **Linux**: `~/.config/slotflow/config.toml`
//! - **macOS**: `~/Library/Application Support/slotflow/config.toml`
//! - **Windows**: `%APPDATA%\slotflow\config.toml`
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! worker_threads = 8
//! max_queued_runs = 16
//!
//! [cache]
//! enabled = true
//! store_results = true
//!
//! [logging]
//! filter = "info,slotflow=debug"
//! log_dir = "/var/log/slotflow"
//! ```
//!
//! Environment overrides applied by [`EngineConfig::apply_env_overrides`]:
//! `SLOTFLOW_WORKER_THREADS` and `SLOTFLOW_LOG`.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for the config directory
pub const APP_ID: &str = "slotflow";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info,slotflow=debug";

pub const ENV_WORKER_THREADS: &str = "SLOTFLOW_WORKER_THREADS";
pub const ENV_LOG_FILTER: &str = "SLOTFLOW_LOG";

// ==================== Config Directory ====================

pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Path of the default config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Sections ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Threads in each run's step worker pool
    pub worker_threads: usize,

    /// Maximum runs waiting behind the current one (0 = unbounded)
    pub max_queued_runs: usize,
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_queued_runs: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Look up node outputs before executing
    pub enabled: bool,

    /// Store node outputs after executing
    pub store_results: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_results: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive, overridden by `RUST_LOG`
    pub filter: String,

    /// Directory for daily-rolling log files
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }
}

// ==================== Engine Config ====================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            EngineError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load from the default location, returning defaults if the file is
    /// missing or unreadable
    pub fn load_or_default() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save as TOML, creating the parent directory if needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| EngineError::Config(format!("Failed to write config: {}", e)))
    }

    /// Apply `SLOTFLOW_WORKER_THREADS` and `SLOTFLOW_LOG`. Invalid values are
    /// logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(ENV_WORKER_THREADS) {
            match value.trim().parse::<usize>() {
                Ok(threads) if threads > 0 => self.scheduler.worker_threads = threads,
                _ => tracing::warn!("Ignoring invalid {}={:?}", ENV_WORKER_THREADS, value),
            }
        }
        if let Ok(filter) = std::env::var(ENV_LOG_FILTER) {
            if !filter.trim().is_empty() {
                self.logging.filter = filter;
            }
        }
    }
}
