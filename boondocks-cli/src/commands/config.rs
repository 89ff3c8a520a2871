//! `boondocks config`: show, locate, or create the daemon config file.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use boondocks_core::{config as core_config, DaemonConfig};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective config (file values over defaults) as YAML.
    Show,
    /// Print the config file location.
    Path,
    /// Write a config file with every default spelled out.
    Init(InitArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

pub fn run(command: ConfigCommand, explicit: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = super::load_config(explicit)?;
            print!("{}", config.to_yaml().context("failed to render config")?);
        }
        ConfigCommand::Path => {
            println!("{}", super::config_file(explicit)?.display());
        }
        ConfigCommand::Init(args) => {
            let path = super::config_file(explicit)?;
            if path.exists() && !args.force {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            core_config::save_file(&path, &DaemonConfig::default())
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}
