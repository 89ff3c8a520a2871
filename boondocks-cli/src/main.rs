//! boondocks: container-side processor daemon and host tooling.
//!
//! # Usage
//!
//! ```text
//! boondocks serve [--endpoint tcp://0.0.0.0:5001] [--batch-size N] [--cache-key-policy P]
//! boondocks send <type> [payload-json] [--endpoint ...]
//! boondocks processors [--json]
//! boondocks config show|init|path
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommand, processors::ProcessorsArgs, send::SendArgs, serve::ServeArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "boondocks",
    version,
    about = "Run analysis processors inside a container on behalf of a host",
    long_about = None,
)]
struct Cli {
    /// Config file to use instead of ~/.boondocks/config.yaml.
    #[arg(long, global = true, env = "BOONDOCKS_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Listen for one host connection and run its events until stop.
    Serve(ServeArgs),

    /// Send one event to a running daemon and print the replies.
    Send(SendArgs),

    /// List the processors this daemon can construct.
    Processors(ProcessorsArgs),

    /// Inspect or create the daemon config file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Serve(args) => {
            let code = args.run(config)?;
            std::process::exit(code);
        }
        Commands::Send(args) => args.run(config),
        Commands::Processors(args) => args.run(),
        Commands::Config { command } => commands::config::run(command, config),
    }
}
