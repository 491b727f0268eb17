//! Task commands.
//!
//! Launch, cancel and inspect tasks through the configured transport. Only a
//! shared (Redis) transport is useful here: an in-memory bus lives and dies
//! with this process.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use taskbus_core::bus::Bus;
use taskbus_core::config::{Config, Transport};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Launch (or relaunch) a task
    Run {
        /// Registered task name
        name: String,

        /// Entity id the task applies to
        id: String,

        /// Delay in seconds before the task runs
        #[arg(short, long, default_value = "0")]
        delay: u64,

        /// JSON argument handed to the task
        #[arg(long, default_value = "null")]
        data: String,
    },

    /// Cancel a pending task
    Cancel {
        /// Registered task name
        name: String,

        /// Entity id the task applies to
        id: String,
    },

    /// Show whether a task is pending
    Status {
        /// Registered task name
        name: String,

        /// Entity id the task applies to
        id: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct TaskStatusRow {
    #[tabled(rename = "Task")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Scheduled")]
    scheduled: bool,
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Delay (s)")]
    delay: String,
}

/// Connect a bus that launches but never consumes.
async fn launcher(cfg: &Config) -> Result<Bus> {
    let mut worker = cfg.worker.clone();
    if worker.transport()? == Transport::Memory {
        bail!(
            "task commands need a shared transport; set --dsn redis://... (got {})",
            worker.redacted_dsn()
        );
    }
    worker.start_worker = false;
    Bus::from_config(&worker)
        .await
        .with_context(|| format!("failed to connect to {}", worker.redacted_dsn()))
}

pub async fn execute(cmd: TaskCommands, cfg: &Config, format: OutputFormat) -> Result<()> {
    let bus = launcher(cfg).await?;
    let tasks = bus.tasks();

    match cmd {
        TaskCommands::Run { name, id, delay, data } => {
            let value: serde_json::Value =
                serde_json::from_str(&data).context("--data must be valid JSON")?;
            tasks
                .launch(&name, id.as_str(), delay, serde_json::to_vec(&value)?)
                .await?;

            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Scheduled {} for {} in {}s",
                    name, id, delay
                )),
                _ => output::print_item(
                    &serde_json::json!({
                        "name": name,
                        "id": id,
                        "delay": delay,
                        "scheduled": true,
                    }),
                    format,
                )?,
            }
        }

        TaskCommands::Cancel { name, id } => {
            tasks.cancel(&name, id.as_str()).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Canceled {} for {}", name, id))
                }
                _ => output::print_item(
                    &serde_json::json!({ "name": name, "id": id, "canceled": true }),
                    format,
                )?,
            }
        }

        TaskCommands::Status { name, id } => {
            let scheduled = tasks.is_scheduled(&name, id.as_str()).await?;
            // An undecodable payload still counts as scheduled; details show "-".
            let pending = tasks.pending(&name, id.as_str()).await.ok().flatten();
            let row = TaskStatusRow {
                name,
                id,
                scheduled,
                instance: pending
                    .as_ref()
                    .map(|p| p.id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                delay: pending
                    .as_ref()
                    .map(|p| p.delay.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            };

            match format {
                OutputFormat::Table => output::print_list(&[row], format)?,
                _ => output::print_item(&row, format)?,
            }
        }
    }

    Ok(())
}
