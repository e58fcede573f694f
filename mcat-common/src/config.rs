//! Configuration loading and resolution
//!
//! Configuration is resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MCAT_*`)
//! 3. TOML config file
//! 4. Compiled defaults (fallback)
//!
//! Tiers 1 and 2 are owned by the binary's argument parser; this module
//! provides the TOML schema, its defaults, and config file discovery.
//! A missing config file is never fatal: it produces a warning and the
//! compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MCAT_CONFIG";

/// Configuration loaded from TOML file
///
/// Every section and field is optional in the file; missing values take
/// the compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub library: LibraryConfig,
    pub workers: WorkersConfig,
    pub schedule: ScheduleConfig,
    pub watch: WatchConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub provider: ProviderConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

/// Media library and artifact output locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directories scanned for media files
    pub roots: Vec<PathBuf>,
    /// Directory receiving one rendered artifact per item
    pub output_dir: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            output_dir: default_data_dir().join("output"),
        }
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkersConfig {
    /// Number of concurrent item executors (0 is clamped to 1)
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { count: 4 }
    }
}

/// Periodic scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Enable the periodic scheduler in daemon mode
    pub enabled: bool,
    /// Seconds between ticks
    pub interval_secs: u64,
    /// Fire one cycle immediately at startup
    pub run_on_startup: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            run_on_startup: true,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Filesystem watcher settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    /// Enable the filesystem watcher in daemon mode
    pub enabled: bool,
    /// Quiet period required after the last write before a file is submitted
    pub debounce_ms: u64,
    /// Watch sub-directories, adding newly created ones as they appear
    pub recursive: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: 2000,
            recursive: true,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Retry policy for external metadata calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Metadata cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// SQLite database file backing the cache
    pub path: PathBuf,
    /// Entry time-to-live in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_dir().join("cache.db"),
            ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Remote metadata provider settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// API key; the primary source is disabled when absent
    pub api_key: Option<String>,
    /// Client-side request rate limit
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.themoviedb.org/3".to_string(),
            api_key: None,
            requests_per_second: 4,
            timeout_secs: 30,
        }
    }
}

/// Status HTTP endpoint settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    /// Listen address (e.g. "127.0.0.1:5780"); disabled when absent
    pub listen: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.schedule.interval_secs == 0 {
            return Err(Error::Config(
                "schedule.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.watch.debounce_ms == 0 {
            return Err(Error::Config(
                "watch.debounce_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(Error::Config(
                "cache.ttl_secs must be greater than 0 when the cache is enabled".to_string(),
            ));
        }
        if self.provider.requests_per_second == 0 {
            return Err(Error::Config(
                "provider.requests_per_second must be greater than 0".to_string(),
            ));
        }
        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(Error::Config(format!(
                "logging.level '{}' is not one of trace, debug, info, warn, error",
                self.logging.level
            )));
        }
        Ok(())
    }
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        return Err(Error::NotFound(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Load config from `path`, falling back to compiled defaults when the file is missing
///
/// A file that exists but fails to parse is still an error.
pub fn load_or_default(path: &Path) -> Result<TomlConfig> {
    match load_toml_config(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Err(Error::NotFound(_)) => {
            warn!(
                "Config file {} not found, using compiled defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        Err(e) => Err(e),
    }
}

/// Write config to a TOML file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Resolve the config file path: CLI argument, then `MCAT_CONFIG`, then the platform default
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    default_config_path()
}

/// Platform default config file location (`~/.config/mcat/config.toml` on Linux)
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("mcat").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("./mcat.toml"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mcat"))
        .unwrap_or_else(|| PathBuf::from("./mcat_data"))
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("mcat"))
        .unwrap_or_else(|| PathBuf::from("./mcat_data"))
}
