use super::AutopilotError;
use rand::Rng;
use std::future::Future;
use tokio::time::{sleep, timeout, Duration};
use tracing::{error, warn};

/// Retries a fallible async operation with exponential backoff.
///
/// Only errors for which [`AutopilotError::is_retryable`] holds are retried; anything
/// else is returned immediately. Each delay gets up to 20% random jitter.
///
/// # Arguments
/// * `operation` - An async closure that returns a Result
/// * `max_retries` - Maximum number of retry attempts
/// * `initial_delay_ms` - Initial delay in milliseconds, which doubles after each attempt
pub async fn retry_with_backoff<F, Fut, T>(
    operation: F,
    max_retries: u32,
    initial_delay_ms: u64,
) -> std::result::Result<T, AutopilotError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, AutopilotError>>,
{
    let mut current_retry = 0;
    let mut delay_ms = initial_delay_ms;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if current_retry >= max_retries || !e.is_retryable() {
                    return Err(e);
                }
                let jitter = rand::thread_rng().gen_range(0..=delay_ms / 5);
                warn!("Operation failed, retrying in {}ms. Error: {:?}", delay_ms + jitter, e);
                sleep(Duration::from_millis(delay_ms + jitter)).await;
                current_retry += 1;
                delay_ms *= 2;
            }
        }
    }
}

/// Bounds an external call. Elapsed calls become [`AutopilotError::Timeout`].
pub async fn with_timeout<Fut, T>(
    limit: Duration,
    context: &str,
    fut: Fut,
) -> std::result::Result<T, AutopilotError>
where
    Fut: Future<Output = std::result::Result<T, AutopilotError>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AutopilotError::Timeout(format!(
            "{} did not complete within {}ms",
            context,
            limit.as_millis()
        ))),
    }
}

/// Logs an error with appropriate severity based on the error type.
///
/// # Arguments
/// * `error` - The AutopilotError to log
/// * `context` - Additional context about where/how the error occurred
pub fn log_error(error: &AutopilotError, context: &str) {
    match error {
        AutopilotError::HttpError { status, message } => {
            if status.is_server_error() {
                error!("{} - HTTP error {}: {}", context, status, message);
            } else {
                warn!("{} - HTTP error {}: {}", context, status, message);
            }
        }
        AutopilotError::NetworkError(msg) | AutopilotError::Timeout(msg) => {
            warn!("{} - Network error: {}", context, msg);
        }
        AutopilotError::TransientRead { source_name, message } => {
            warn!("{} - Transient read failure from {}: {}", context, source_name, message);
        }
        AutopilotError::Execution { kind, message } => {
            error!("{} - Execution failure: {} - {}", context, kind, message);
        }
        AutopilotError::Unrecoverable(msg) => {
            error!("{} - Unrecoverable: {}", context, msg);
        }
        AutopilotError::Validation(_) | AutopilotError::Authorization { .. } => {
            warn!("{} - Rejected request: {}", context, error);
        }
        _ => error!("{} - Unexpected error: {}", context, error),
    }
}

/// Converts a reqwest error to an AutopilotError with additional context.
///
/// # Arguments
/// * `error` - The reqwest error to convert
/// * `context` - Additional context about the request that failed
pub fn handle_reqwest_error(error: reqwest::Error, context: &str) -> AutopilotError {
    if error.is_timeout() {
        AutopilotError::Timeout(format!("{}: Request timed out - {}", context, error))
    } else if let Some(status) = error.status() {
        AutopilotError::HttpError {
            status,
            message: format!("{}: {}", context, error),
        }
    } else {
        AutopilotError::NetworkError(format!("{}: {}", context, error))
    }
}
