//! Configuration loading and data folder resolution
//!
//! Configuration lives in a single TOML file. A missing file is not an error:
//! the services start with compiled defaults and log a warning.
//!
//! Resolution priority for the data folder (where `f501.db` lives):
//! 1. Command-line argument
//! 2. `F501_DATA_FOLDER` environment variable
//! 3. `data_folder` in the TOML file
//! 4. OS-dependent compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "F501_CONFIG";
/// Environment variable naming the data folder
pub const DATA_FOLDER_ENV_VAR: &str = "F501_DATA_FOLDER";
/// Database file name inside the data folder
pub const DATABASE_FILE_NAME: &str = "f501.db";

/// Complete TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the SQLite database
    pub data_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub source: SourceConfig,
    pub harvest: HarvestConfig,
    pub season: SeasonConfig,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[source]` section: where the external statistics come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the statistics source
    pub base_url: String,
    /// User agent sent with every request
    pub user_agent: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8001/api".to_string(),
            user_agent: concat!("f501-harvest/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `[harvest]` section: pacing, concurrency and retry policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarvestConfig {
    /// Concurrent workers draining the entity queue
    pub workers: usize,
    /// Minimum spacing between two source requests, across all workers
    pub min_interval_ms: u64,
    /// Total fetch attempts an entity may consume before it stays failed
    pub max_attempts: u32,
    /// Entities harvested more recently than this are skipped unless forced
    pub freshness_days: i64,
    /// Initial delay between retry rounds (doubles every round)
    pub retry_backoff_ms: u64,
    /// Max time spent retrying a write on SQLite lock contention
    pub max_lock_wait_ms: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            min_interval_ms: 7000,
            max_attempts: 3,
            freshness_days: 30,
            retry_backoff_ms: 30_000,
            max_lock_wait_ms: 5000,
        }
    }
}

impl HarvestConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.freshness_days)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("harvest.workers must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "harvest.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.freshness_days < 0 {
            return Err(Error::Config(
                "harvest.freshness_days must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[season]` section: what "current season" means for scheduled updates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeasonConfig {
    pub current_season: String,
    /// Leagues re-seeded by the current-season update
    pub leagues: Vec<String>,
}

impl Default for SeasonConfig {
    fn default() -> Self {
        Self {
            current_season: "2024-2025".to_string(),
            leagues: vec!["Premier League".to_string()],
        }
    }
}

impl TomlConfig {
    /// Apply environment overrides for pacing and retry settings
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<u64>("F501_MIN_INTERVAL_MS") {
            self.harvest.min_interval_ms = v;
        }
        if let Some(v) = env_parse::<usize>("F501_WORKERS") {
            self.harvest.workers = v;
        }
        if let Some(v) = env_parse::<u32>("F501_MAX_ATTEMPTS") {
            self.harvest.max_attempts = v;
        }
        if let Some(v) = env_parse::<u64>("F501_REQUEST_TIMEOUT_SECS") {
            self.source.request_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("F501_CURRENT_SEASON") {
            if !v.trim().is_empty() {
                self.season.current_season = v;
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => {
            debug!(var = name, value = %raw, "Applying environment override");
            Some(v)
        }
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Locate the TOML config file
///
/// CLI argument, then `F501_CONFIG`, then `<platform config dir>/f501/config.toml`.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir().map(|d| d.join("f501").join("config.toml"))
}

/// Load TOML config, falling back to defaults when the file is missing
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)?;
    config.harvest.validate()?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;

    Ok(())
}

/// Data folder resolution
pub struct DataFolderResolver {
    cli_arg: Option<PathBuf>,
}

impl DataFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>) -> Self {
        Self { cli_arg }
    }

    /// Resolve the data folder following the documented priority order
    pub fn resolve(&self, config: &TomlConfig) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(DATA_FOLDER_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &config.data_folder {
            return path.clone();
        }

        // Priority 4: OS-dependent compiled default
        default_data_folder()
    }
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("f501"))
        .unwrap_or_else(|| PathBuf::from("./f501_data"))
}

/// Path of the database file inside a data folder
pub fn database_path(data_folder: &Path) -> PathBuf {
    data_folder.join(DATABASE_FILE_NAME)
}
