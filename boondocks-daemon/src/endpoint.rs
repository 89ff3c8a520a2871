//! Listen / connect addresses for the host ↔ daemon channel.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::DaemonError;

/// Where the daemon listens and the host connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://HOST:PORT`
    Tcp(String),
    /// `unix:///absolute/path.sock`
    Unix(PathBuf),
}

impl Endpoint {
    pub fn unix(path: impl AsRef<Path>) -> Self {
        Self::Unix(path.as_ref().to_path_buf())
    }
}

impl FromStr for Endpoint {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            let valid = addr
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if valid {
                return Ok(Self::Tcp(addr.to_string()));
            }
        } else if let Some(path) = s.strip_prefix("unix://") {
            if !path.is_empty() {
                return Ok(Self::Unix(PathBuf::from(path)));
            }
        }
        Err(DaemonError::Endpoint(s.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}
