//! Configuration file for ~/.config/gator/config.toml.
//!
//! The file is optional: a missing or empty file yields `Config::default()`.
//! Unknown keys are ignored with a warning. `register` and `login` write
//! the current user back with [`Config::set_user`].
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{default_user_agent, FetcherConfig};
use crate::scheduler::SchedulerConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to `gator.db` beside the config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// User that user-scoped commands act as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user_name: Option<String>,

    pub aggregator: AggregatorConfig,
}

/// `[aggregator]` table: scheduling and HTTP policy for `agg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub tick_interval_secs: u64,
    pub worker_count: usize,
    pub http_timeout_secs: u64,
    /// 0 = a feed is due again on the tick after it was fetched
    pub refetch_after_secs: u64,
    pub user_agent: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            worker_count: 4,
            http_timeout_secs: 10,
            refetch_after_secs: 0,
            user_agent: default_user_agent(),
        }
    }
}

impl AggregatorConfig {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs.max(1)),
            worker_count: self.worker_count.max(1),
            refetch_after: Duration::from_secs(self.refetch_after_secs),
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            timeout: Duration::from_secs(self.http_timeout_secs.max(1)),
            user_agent: self.user_agent.clone(),
            ..FetcherConfig::default()
        }
    }
}

const KNOWN_KEYS: [&str; 3] = ["db_path", "current_user_name", "aggregator"];
const KNOWN_AGGREGATOR_KEYS: [&str; 5] = [
    "tick_interval_secs",
    "worker_count",
    "http_timeout_secs",
    "refetch_after_secs",
    "user_agent",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            user = ?config.current_user_name,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Write the configuration, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Make `name` the current user and save.
    pub fn set_user(&mut self, name: &str, path: &Path) -> Result<(), ConfigError> {
        self.current_user_name = Some(name.to_string());
        self.save(path)
    }

    /// Database file, resolved against the config directory when unset.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir.join("gator.db"))
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    for key in raw.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }

    if let Some(toml::Value::Table(aggregator)) = raw.get("aggregator") {
        for key in aggregator.keys() {
            if !KNOWN_AGGREGATOR_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Unknown key in [aggregator], ignoring");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
