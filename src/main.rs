use dotenv::dotenv;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use lp_autopilot::auth::SimulatedVerifier;
use lp_autopilot::chain::registry::{rpc_url, supported_chain_ids};
use lp_autopilot::chain::SimulatedChainClient;
use lp_autopilot::config::Settings;
use lp_autopilot::engine::{AutopilotEngine, Collaborators, Dispatcher, DispatcherCommand, SystemClock};
use lp_autopilot::error::{AutopilotError, Result as AutopilotResult};
use lp_autopilot::market_data::HttpPriceHistory;
use lp_autopilot::monitoring::log_utils::{check_log_directory, rotate_logs, MAX_LOG_FILES};
use lp_autopilot::monitoring::{init_logging, init_metrics};
use lp_autopilot::task::InMemoryTaskStore;

#[tokio::main]
async fn main() -> AutopilotResult<()> {
    // Load .env file first
    dotenv().ok();

    let settings = Settings::from_env()?;

    let _guard = init_logging(&settings.log_dir, &settings.file_log_level, &settings.log_level)?;
    let main_span = tracing::info_span!("main_execution");
    let _main_span_guard = main_span.enter();

    info!("Starting LP autopilot...");

    match check_log_directory(&settings.log_dir) {
        Ok(bytes) => info!(log_dir = %settings.log_dir, bytes, "Log directory checked"),
        Err(e) => warn!(error = %e, "Log directory check failed"),
    }
    match rotate_logs(&settings.log_dir, MAX_LOG_FILES) {
        Ok(removed) if removed > 0 => info!(removed, "Rotated old log files"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Log rotation failed"),
    }

    if let Some(port) = settings.metrics_port {
        init_metrics(port)?;
    }

    if !settings.simulation_mode {
        return Err(AutopilotError::ConfigError(
            "no live chain client is linked into this build; set SIMULATION_MODE=true".to_string(),
        ));
    }
    info!(
        max_attempts = settings.max_execution_attempts,
        max_concurrent = settings.max_concurrent_tasks,
        "Running in simulation mode"
    );
    for chain_id in supported_chain_ids() {
        if let Some(url) = rpc_url(chain_id, &settings) {
            info!(chain_id, rpc_url = %url, "Chain endpoint");
        }
    }

    let prices = HttpPriceHistory::new(
        settings.price_feed_url.clone(),
        settings.price_feed_api_key.clone(),
        settings.rpc_timeout(),
    )?;

    let engine = Arc::new(AutopilotEngine::new(
        &settings,
        Collaborators {
            store: Arc::new(InMemoryTaskStore::new()),
            chain: Arc::new(SimulatedChainClient::new()),
            prices: Arc::new(prices),
            verifier: Arc::new(SimulatedVerifier),
            clock: Arc::new(SystemClock),
        },
    ));

    let (dispatcher, cmd_tx) = Dispatcher::new(engine, &settings);
    let dispatcher_handle = tokio::spawn(async move {
        if let Err(e) = dispatcher.start().await {
            error!(error = %e, "Dispatcher stopped with an error");
        }
    });

    // Handle graceful shutdown (Ctrl+C)
    let shutdown_tx = cmd_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Ctrl+C received. Sending shutdown signal to dispatcher...");
        if shutdown_tx.send(DispatcherCommand::Shutdown).await.is_err() {
            error!("Failed to send shutdown command to dispatcher.");
        }
    });

    info!("Dispatcher running. Press Ctrl+C to exit.");

    if let Err(e) = dispatcher_handle.await {
        error!(error = ?e, "Dispatcher task failed or panicked");
    }

    info!("LP autopilot shutting down...");
    Ok(())
}
