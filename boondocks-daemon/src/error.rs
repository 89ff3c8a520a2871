use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, transport, and host client.
///
/// Processor failures never appear here; they are reported as wire events.
/// Everything in this enum is a loop-level failure.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("core error: {0}")]
    Core(#[from] boondocks_core::CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("invalid endpoint '{0}'; expected tcp://HOST:PORT or unix:///PATH")]
    Endpoint(String),

    #[error("daemon is not running (nothing listening on {endpoint})")]
    DaemonNotRunning { endpoint: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
