//! Error types for boondocks-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from decoding events or loading configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure (permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure on the wire.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An inbound event decoded as JSON but its payload did not match the
    /// shape its type requires.
    #[error("invalid '{event}' payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    /// YAML serialization error (config rendering).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A config value was syntactically valid YAML but semantically wrong.
    #[error("invalid config value for '{key}': {message}")]
    ConfigValue { key: &'static str, message: String },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.boondocks/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
