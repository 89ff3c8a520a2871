//! `boondocks processors`: what this build can run.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use boondocks_daemon::ProcessorRegistry;

#[derive(Args, Debug)]
pub struct ProcessorsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize, Tabled)]
struct ProcessorRow {
    #[tabled(rename = "className")]
    #[serde(rename = "className")]
    class_name: String,
    #[tabled(rename = "module")]
    module: String,
}

impl ProcessorsArgs {
    pub fn run(self) -> Result<()> {
        let registry = ProcessorRegistry::with_builtin();
        let rows: Vec<ProcessorRow> = registry
            .names()
            .map(|name| ProcessorRow {
                class_name: name.to_string(),
                module: name
                    .rsplit_once('.')
                    .map(|(module, _)| module.to_string())
                    .unwrap_or_default(),
            })
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to render processors JSON")?
            );
            return Ok(());
        }

        println!("{}", "PROCESSORS".bold());
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
