//! Worker process command.
//!
//! Installs telemetry, registers the built-in tasks, starts consuming and
//! drains cleanly on SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use taskbus_core::bus::Bus;
use taskbus_core::config::Config;
use taskbus_core::tasks::builtin;
use taskbus_core::telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct WorkerArgs {
    /// Override the number of workers
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Serialize)]
struct WorkerSummary {
    protocol: &'static str,
    workers: usize,
    executed: u64,
    failed: u64,
    panicked: u64,
}

pub async fn execute(args: WorkerArgs, mut cfg: Config, format: OutputFormat) -> Result<()> {
    if let Some(workers) = args.workers {
        cfg.worker.num_workers = workers;
        cfg.worker.start_worker = true;
        cfg.validate()?;
    }

    init_telemetry(&TelemetryConfig {
        logging: cfg.logging.clone(),
        metrics: cfg.metrics.clone(),
    })?;

    let bus = Bus::from_config(&cfg.worker)
        .await
        .with_context(|| format!("failed to connect to {}", cfg.worker.redacted_dsn()))?;

    builtin::register_echo(bus.tasks())?;
    bus.start()?;

    info!(
        dsn = %cfg.worker.redacted_dsn(),
        workers = cfg.worker.num_workers,
        tasks = ?bus.tasks().task_names(),
        "Worker started"
    );

    shutdown_signal().await;
    info!("Shutdown signal received, draining");
    bus.stop().await;

    let stats = bus.tasks().stats();
    let summary = WorkerSummary {
        protocol: bus.protocol(),
        workers: cfg.worker.num_workers,
        executed: stats.executed,
        failed: stats.failed,
        panicked: stats.panicked,
    };

    match format {
        OutputFormat::Table => {
            output::print_header("Worker Summary");
            output::print_detail("Transport", summary.protocol);
            output::print_detail("Workers", &summary.workers.to_string());
            output::print_detail("Executed", &summary.executed.to_string());
            output::print_detail("Failed", &summary.failed.to_string());
            output::print_detail("Panicked", &summary.panicked.to_string());
            output::print_success("Worker stopped");
        }
        _ => output::print_item(&summary, format)?,
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
