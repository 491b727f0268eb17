//! Prometheus metrics for the scheduler, the event bus and the worker pool.
//!
//! Metrics are recorded through the `metrics` facade at every call site.
//! Without an installed recorder every call is a no-op, so library users who
//! never call [`init_metrics`] pay nothing.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus exporter endpoint (e.g., "0.0.0.0:9090")
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,

    /// Histogram buckets for task durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_metrics_endpoint(),
            duration_buckets: default_duration_buckets(),
        }
    }
}

fn default_metrics_endpoint() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
}

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a tokio runtime when enabled.
///
/// # Errors
///
/// Returns an error if the endpoint is not a socket address or a recorder
/// is already installed.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config.endpoint.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(&config.duration_buckets)?
        .install()?;

    register_metric_descriptions();

    tracing::info!(endpoint = %config.endpoint, "Metrics initialized");
    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!("taskbus_errors_total", "Total number of errors by code");

    // Scheduler
    describe_counter!("taskbus_tasks_scheduled_total", "Tasks launched");
    describe_counter!("taskbus_tasks_canceled_total", "Task cancellations");
    describe_counter!("taskbus_tasks_executed_total", "Handlers that returned Ok");
    describe_counter!(
        "taskbus_tasks_superseded_total",
        "Timers that found a newer launch of the same task"
    );
    describe_counter!(
        "taskbus_tasks_lost_total",
        "Timers that found no stored payload (canceled or expired)"
    );
    describe_counter!("taskbus_tasks_failed_total", "Handler failures by reason");
    describe_gauge!("taskbus_timers_pending", "Delay timers currently waiting");
    describe_histogram!(
        "taskbus_task_duration_seconds",
        "Handler execution duration in seconds"
    );

    // Event bus
    describe_counter!("taskbus_events_pushed_total", "Events pushed to the bus");
    describe_counter!("taskbus_events_received_total", "Events dispatched to handlers");
}

// ═══════════════════════════════════════════════════════════════════════════════
// Recording helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Scheduler metrics keyed by task name.
pub struct TaskMetrics;

impl TaskMetrics {
    pub fn scheduled(task: &str) {
        counter!("taskbus_tasks_scheduled_total", "task" => task.to_string()).increment(1);
    }

    pub fn canceled(task: &str) {
        counter!("taskbus_tasks_canceled_total", "task" => task.to_string()).increment(1);
    }

    pub fn superseded(task: &str) {
        counter!("taskbus_tasks_superseded_total", "task" => task.to_string()).increment(1);
    }

    pub fn lost(task: &str) {
        counter!("taskbus_tasks_lost_total", "task" => task.to_string()).increment(1);
    }

    pub fn executed(task: &str, duration: Duration) {
        counter!("taskbus_tasks_executed_total", "task" => task.to_string()).increment(1);
        histogram!("taskbus_task_duration_seconds", "task" => task.to_string())
            .record(duration.as_secs_f64());
    }

    /// `reason` is one of `error`, `panic` or `decode`.
    pub fn failed(task: &str, reason: &'static str) {
        counter!(
            "taskbus_tasks_failed_total",
            "task" => task.to_string(),
            "reason" => reason,
        )
        .increment(1);
    }

    pub fn timer_started() {
        gauge!("taskbus_timers_pending").increment(1.0);
    }

    pub fn timer_finished() {
        gauge!("taskbus_timers_pending").decrement(1.0);
    }
}

/// Event bus metrics keyed by transport and event name.
pub struct EventMetrics;

impl EventMetrics {
    pub fn pushed(transport: &'static str, event: &str) {
        counter!(
            "taskbus_events_pushed_total",
            "transport" => transport,
            "event" => event.to_string(),
        )
        .increment(1);
    }

    pub fn received(transport: &'static str, event: &str) {
        counter!(
            "taskbus_events_received_total",
            "transport" => transport,
            "event" => event.to_string(),
        )
        .increment(1);
    }
}
