//! Taskbus CLI - launch, inspect and run delayed tasks.
//!
//! Provides commands for task launching, worker processes, health probes and
//! configuration inspection.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use taskbus_core::config::Config;

use commands::{config, health, task, worker};
use output::OutputFormat;

/// Taskbus - delayed, cancelable task scheduler
#[derive(Parser)]
#[command(
    name = "taskbus",
    version = "0.1.0",
    about = "Taskbus - delayed, cancelable task scheduler",
    long_about = "CLI tool for launching and canceling delayed tasks \
                  and for running taskbus workers.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Transport DSN (memory:// or redis://[user:pass@]host[:port][/db])
    #[arg(long, global = true, env = "TASKBUS_WORKER__DSN")]
    dsn: Option<String>,

    /// Configuration file (toml, yaml or json)
    #[arg(long = "config", global = true, value_name = "FILE")]
    config_file: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch, cancel and inspect tasks
    #[command(subcommand)]
    Task(task::TaskCommands),

    /// Run a worker process until interrupted
    Worker(worker::WorkerArgs),

    /// Probe the store with a write/read/delete round trip
    Health(health::HealthArgs),

    /// Configuration inspection
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Load the configuration file (or the environment alone), then apply
/// command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match &cli.config_file {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => Config::load().context("failed to load configuration")?,
    };

    if let Some(dsn) = &cli.dsn {
        cfg.worker.dsn = dsn.clone();
        cfg.validate()?;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;
    let result = match load_config(&cli) {
        Ok(cfg) => match cli.command {
            Commands::Task(cmd) => task::execute(cmd, &cfg, format).await,
            Commands::Worker(args) => worker::execute(args, cfg, format).await,
            Commands::Health(args) => health::execute(args, &cfg, format).await,
            Commands::Config(cmd) => config::execute(cmd, &cfg, format),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
