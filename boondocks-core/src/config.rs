//! Daemon configuration file.
//!
//! # Storage layout
//!
//! ```text
//! ~/.boondocks/
//!   config.yaml   (optional: every key has a default)
//! ```
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::CacheKeyPolicy;

/// Endpoint analysis containers listen on by default.
pub const DEFAULT_ENDPOINT: &str = "tcp://0.0.0.0:5001";

/// Expand batch size used when neither the config nor the generate
/// settings provide one.
pub const DEFAULT_BATCH_SIZE: usize = 50;

// ---------------------------------------------------------------------------
// 1. Types
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'; expected: text, json")),
        }
    }
}

/// Logging section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `boondocks_daemon=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// `tcp://HOST:PORT` or `unix:///path/to.sock`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Default expand batch size for generators.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub cache_key_policy: CacheKeyPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            batch_size: default_batch_size(),
            cache_key_policy: CacheKeyPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.batch_size == 0 {
            return Err(CoreError::ConfigValue {
                key: "batch_size",
                message: "must be at least 1".to_string(),
            });
        }
        if !(self.endpoint.starts_with("tcp://") || self.endpoint.starts_with("unix://")) {
            return Err(CoreError::ConfigValue {
                key: "endpoint",
                message: format!(
                    "'{}' must start with tcp:// or unix://",
                    self.endpoint
                ),
            });
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, CoreError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.boondocks/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".boondocks").join("config.yaml")
}

/// `config_path_at` convenience wrapper.
pub fn config_path() -> Result<PathBuf, CoreError> {
    Ok(config_path_at(&home()?))
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load a config file from an explicit path.
///
/// A missing file yields the defaults. Malformed YAML yields
/// `CoreError::ConfigParse` with path + line context.
pub fn load_file(path: &Path) -> Result<DaemonConfig, CoreError> {
    if !path.exists() {
        return Ok(DaemonConfig::default());
    }
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(DaemonConfig::default());
    }
    let config: DaemonConfig =
        serde_yaml::from_str(&contents).map_err(|e| CoreError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
    config.validate()?;
    Ok(config)
}

/// Load `<home>/.boondocks/config.yaml`.
pub fn load_at(home: &Path) -> Result<DaemonConfig, CoreError> {
    load_file(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<DaemonConfig, CoreError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically write `config` to `<home>/.boondocks/config.yaml`.
///
/// Write flow: serialize → `<name>.tmp` sibling → `rename`.
pub fn save_at(home: &Path, config: &DaemonConfig) -> Result<PathBuf, CoreError> {
    let path = config_path_at(home);
    save_file(&path, config)?;
    Ok(path)
}

/// Atomically write `config` to an explicit path.
pub fn save_file(path: &Path, config: &DaemonConfig) -> Result<(), CoreError> {
    config.validate()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, config.to_yaml()?)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &DaemonConfig) -> Result<PathBuf, CoreError> {
    save_at(&home()?, config)
}

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}
