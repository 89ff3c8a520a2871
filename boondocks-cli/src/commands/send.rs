//! `boondocks send <type> [payload]`: act as the host for one request.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};

use boondocks_core::Event;
use boondocks_daemon::{DaemonError, Endpoint, HostConnection};

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Event type: ready, execute, generate, preprocess, teardown, stop.
    #[arg(value_name = "TYPE")]
    pub kind: String,

    /// JSON payload. Defaults to `{}`; `-` reads it from stdin.
    #[arg(value_name = "PAYLOAD")]
    pub payload: Option<String>,

    /// Daemon endpoint. Defaults to the config file's endpoint.
    #[arg(long, env = "BOONDOCKS_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Pretty-print each reply instead of one JSON object per line.
    #[arg(long)]
    pub pretty: bool,
}

impl SendArgs {
    pub fn run(self, config_path: Option<&Path>) -> Result<()> {
        let endpoint = match self.endpoint {
            Some(endpoint) => endpoint,
            None => super::load_config(config_path)?.endpoint,
        };
        let endpoint: Endpoint = endpoint.parse()?;
        let payload = read_payload(self.payload.as_deref())?;

        let mut connection = match HostConnection::connect(&endpoint) {
            Ok(connection) => connection,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                bail!("daemon is not running at {endpoint}")
            }
            Err(err) => return Err(err).context("failed to connect to daemon"),
        };

        let request = Event::new(self.kind, payload);
        let replies = connection
            .request(&request)
            .with_context(|| format!("'{}' request failed", request.kind))?;

        for reply in &replies {
            let rendered = if self.pretty {
                serde_json::to_string_pretty(reply)
            } else {
                serde_json::to_string(reply)
            };
            println!("{}", rendered.context("failed to render reply")?);
        }

        if let Some(failure) = replies.iter().find(|reply| reply.kind == "hardfailure") {
            let message = failure.payload["message"].as_str().unwrap_or("unknown failure");
            bail!("daemon hard failure: {message}");
        }

        let errors = replies.iter().filter(|reply| reply.kind == "error").count();
        let summary = format!("{} replies, {errors} errors", replies.len());
        if errors == 0 {
            eprintln!("{} {summary}", "✓".green().bold());
        } else {
            eprintln!("{} {summary}", "!".yellow().bold());
        }
        Ok(())
    }
}

fn read_payload(raw: Option<&str>) -> Result<Value> {
    let text = match raw {
        None => return Ok(json!({})),
        Some("-") => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read payload from stdin")?;
            buffer
        }
        Some(text) => text.to_string(),
    };
    let payload: Value = serde_json::from_str(&text).context("payload is not valid JSON")?;
    if !payload.is_object() {
        bail!("payload must be a JSON object");
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_defaults_to_empty_object() {
        assert_eq!(read_payload(None).unwrap(), json!({}));
    }

    #[test]
    fn payload_must_be_an_object() {
        assert!(read_payload(Some("[1,2]")).is_err());
        assert!(read_payload(Some("{oops")).is_err());
        assert_eq!(
            read_payload(Some(r#"{"status": 2}"#)).unwrap(),
            json!({"status": 2})
        );
    }
}
