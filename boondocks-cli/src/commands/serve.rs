//! `boondocks serve`: run the daemon in the foreground.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use boondocks_core::{CacheKeyPolicy, DaemonConfig, LogFormat};
use boondocks_daemon::{start_blocking, ProcessorRegistry};

/// Flags override the config file; unset flags keep the file's values.
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Listen endpoint: tcp://HOST:PORT or unix:///PATH.
    #[arg(long, env = "BOONDOCKS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Default expand batch size for generators.
    #[arg(long, env = "BOONDOCKS_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// include-checksum | ignore-checksum.
    #[arg(long, value_name = "POLICY")]
    pub cache_key_policy: Option<CacheKeyPolicy>,

    /// Log filter directive, e.g. `info` or `boondocks_daemon=debug`.
    #[arg(long, env = "BOONDOCKS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// text | json.
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

impl ServeArgs {
    /// Serve until the loop ends and return the process exit code.
    pub fn run(self, config_path: Option<&Path>) -> Result<i32> {
        let mut config = super::load_config(config_path)?;
        self.apply(&mut config);
        config.validate().context("invalid daemon configuration")?;

        let shutdown = start_blocking(&config, ProcessorRegistry::with_builtin())
            .context("daemon exited with error")?;
        Ok(shutdown.exit_code())
    }

    fn apply(self, config: &mut DaemonConfig) {
        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(policy) = self.cache_key_policy {
            config.cache_key_policy = policy;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_flags_keep_config_values() {
        let mut config = DaemonConfig {
            batch_size: 7,
            ..DaemonConfig::default()
        };
        ServeArgs {
            endpoint: Some("unix:///tmp/b.sock".into()),
            log_format: Some(LogFormat::Json),
            ..ServeArgs::default()
        }
        .apply(&mut config);

        assert_eq!(config.endpoint, "unix:///tmp/b.sock");
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.cache_key_policy, CacheKeyPolicy::IncludeChecksum);
    }
}
