//! Configuration inspection commands.
//!
//! Configuration itself comes from `--config`, `.env` and `TASKBUS__*`
//! environment variables; these commands only display the result.

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use taskbus_core::config::Config;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Validate the configuration and print the selected transport
    Check,
}

#[derive(Serialize, Tabled)]
struct ConfigRow {
    #[tabled(rename = "Key")]
    key: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// Flatten the configuration into displayable rows.
fn rows(cfg: &Config) -> Vec<ConfigRow> {
    let w = &cfg.worker;
    let row = |key, value: String| ConfigRow { key, value };
    vec![
        row("worker.dsn", w.redacted_dsn()),
        row("worker.num_workers", w.num_workers.to_string()),
        row("worker.start_worker", w.start_worker.to_string()),
        row("worker.key_prefix", w.key_prefix.clone()),
        row("worker.namespace", w.namespace.clone()),
        row("worker.events_list", w.events_list.clone()),
        row("worker.ttl_margin_secs", w.ttl_margin_secs.to_string()),
        row("worker.poll_timeout_secs", w.poll_timeout_secs.to_string()),
        row("worker.queue_capacity", w.queue_capacity().to_string()),
        row("logging.level", cfg.logging.level.clone()),
        row("logging.format", format!("{:?}", cfg.logging.format).to_lowercase()),
        row("metrics.enabled", cfg.metrics.enabled.to_string()),
        row("metrics.endpoint", cfg.metrics.endpoint.clone()),
    ]
}

pub fn execute(cmd: ConfigCommands, cfg: &Config, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => match format {
            OutputFormat::Table => {
                output::print_header("Configuration");
                output::print_list(&rows(cfg), format)?;
            }
            _ => {
                let mut shown = cfg.clone();
                shown.worker.dsn = cfg.worker.redacted_dsn();
                output::print_item(&shown, format)?;
            }
        },

        ConfigCommands::Check => {
            // Loading already validated; report what was selected.
            let transport = cfg.worker.transport()?;
            match format {
                OutputFormat::Table => {
                    output::print_success("Configuration is valid");
                    output::print_detail("Transport", transport.protocol());
                    output::print_detail("DSN", &transport.to_string());
                }
                _ => output::print_item(
                    &serde_json::json!({
                        "valid": true,
                        "transport": transport.protocol(),
                        "dsn": transport.to_string(),
                    }),
                    format,
                )?,
            }
        }
    }

    Ok(())
}
