//! Health check command.
//!
//! Writes, reads back and deletes a probe key in the configured store and
//! reports the latency of each step.

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use std::time::{Duration, Instant};
use taskbus_core::bus::Bus;
use taskbus_core::config::Config;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// TTL of the probe key in seconds
    #[arg(long, default_value = "10")]
    ttl: u64,
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    transport: &'static str,
    store: &'static str,
    set_ms: f64,
    get_ms: f64,
    del_ms: f64,
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

pub async fn execute(args: HealthArgs, cfg: &Config, format: OutputFormat) -> Result<()> {
    let mut worker = cfg.worker.clone();
    worker.start_worker = false;
    let bus = Bus::from_config(&worker).await?;
    let store = bus.store();

    let key = format!("health:{}", uuid::Uuid::new_v4());
    let expected = "ok";

    let started = Instant::now();
    store.set(&key, expected, Duration::from_secs(args.ttl)).await?;
    let set_ms = millis(started.elapsed());

    let started = Instant::now();
    let read = store.get(&key).await?;
    let get_ms = millis(started.elapsed());

    let started = Instant::now();
    store.del(&key).await?;
    let del_ms = millis(started.elapsed());

    if read.as_deref() != Some(expected) {
        bail!("store returned {:?} for the probe key", read);
    }

    let report = HealthReport {
        status: "healthy",
        transport: bus.protocol(),
        store: store.name(),
        set_ms,
        get_ms,
        del_ms,
    };

    match format {
        OutputFormat::Table => {
            output::print_header("Store Health");
            output::print_detail("Transport", report.transport);
            output::print_detail("DSN", &worker.redacted_dsn());
            output::print_detail("Set", &format!("{:.2} ms", report.set_ms));
            output::print_detail("Get", &format!("{:.2} ms", report.get_ms));
            output::print_detail("Del", &format!("{:.2} ms", report.del_ms));
            output::print_success("Store operational");
        }
        _ => output::print_item(&report, format)?,
    }

    Ok(())
}
