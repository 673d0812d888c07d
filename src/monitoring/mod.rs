use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use autopilot_types::{TaskEvent, TaskStatus};

use crate::error::{AutopilotError, Result};

pub mod log_utils;

pub const LOG_FILE_NAME: &str = "autopilot.log";

/// Initializes the logging system (both console and file).
/// Returns a guard that must be kept alive for file logging to work.
pub fn init_logging(log_dir: &str, file_level: &str, console_level: &str) -> Result<WorkerGuard> {
    let log_path = Path::new(log_dir);
    if !log_path.exists() {
        std::fs::create_dir_all(log_path)?;
    }

    // --- File Logger ---
    let file_appender = rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter = EnvFilter::try_new(file_level)
        .map_err(|e| AutopilotError::ConfigError(format!("Invalid file log level filter '{}': {}", file_level, e)))?;
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .with_filter(file_filter);

    // --- Console Logger ---
    let console_filter = EnvFilter::try_new(console_level)
        .map_err(|e| AutopilotError::ConfigError(format!("Invalid console log level filter '{}': {}", console_level, e)))?;
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AutopilotError::InternalError(format!("Failed to initialize tracing subscriber: {}", e)))?;

    Ok(guard)
}

/// Installs the Prometheus exporter on `0.0.0.0:port`.
pub fn init_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AutopilotError::InternalError(format!("Failed to install metrics exporter: {}", e)))?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Logs a status transition and bumps the transition counter.
pub fn record_transition(event: &TaskEvent) {
    metrics::increment_counter!(
        "autopilot_task_transitions_total",
        "from" => event.from.as_str(),
        "to" => event.to.as_str()
    );
    let level_is_failure = event.to == TaskStatus::Invalid;
    if level_is_failure {
        tracing::warn!(
            target: "task_event",
            attempt_id = %event.attempt_id,
            owner = %event.owner_addr,
            chain_id = event.chain_id,
            task_id = event.task_id,
            from = %event.from,
            to = %event.to,
            details = %event.details,
            at = %event.timestamp,
            "Task invalidated"
        );
    } else {
        info!(
            target: "task_event",
            attempt_id = %event.attempt_id,
            owner = %event.owner_addr,
            chain_id = event.chain_id,
            task_id = event.task_id,
            from = %event.from,
            to = %event.to,
            details = %event.details,
            at = %event.timestamp,
            "Task transition"
        );
    }
}

pub fn record_evaluation(condition_kind: &'static str, outcome: &'static str) {
    metrics::increment_counter!(
        "autopilot_evaluations_total",
        "condition" => condition_kind,
        "outcome" => outcome
    );
}

pub fn record_guard_rejection(action_kind: &'static str) {
    metrics::increment_counter!("autopilot_guard_rejections_total", "action" => action_kind);
}

pub fn record_execution_latency(action_kind: &'static str, elapsed: Duration) {
    metrics::histogram!(
        "autopilot_execution_seconds",
        elapsed.as_secs_f64(),
        "action" => action_kind
    );
}
