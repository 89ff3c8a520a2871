pub mod config;
pub mod processors;
pub mod send;
pub mod serve;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use boondocks_core::{config as core_config, DaemonConfig};

/// Resolve the config file: explicit `--config`, else the home default.
pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => core_config::config_path().context("could not determine home directory"),
    }
}

/// Load the config file, falling back to defaults when it does not exist.
pub fn load_config(explicit: Option<&Path>) -> Result<DaemonConfig> {
    let path = config_file(explicit)?;
    core_config::load_file(&path).with_context(|| format!("failed to load {}", path.display()))
}
