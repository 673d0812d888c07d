use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use autopilot_types::Condition;

/// Runtime settings, loaded from the environment (and an optional `.env` file).
///
/// Nested keys use `__` as separator, e.g. `RPC_URL_OVERRIDES__10=https://...`.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    // Logging
    pub log_dir: String,
    pub log_level: String,
    pub file_log_level: String,

    // Runtime mode
    pub simulation_mode: bool,
    pub metrics_port: Option<u16>,

    // External calls
    pub rpc_timeout_secs: u64,
    #[serde(default)]
    pub rpc_url_overrides: HashMap<String, String>,
    pub price_feed_url: String,
    pub price_feed_api_key: Option<String>,

    // Dispatcher
    pub max_execution_attempts: u32,
    pub max_concurrent_tasks: usize,
    pub dispatch_tick_ms: u64,
    pub time_poll_secs: u64,
    pub token_amount_poll_secs: u64,
    pub price_poll_secs: u64,

    // Price history resolution: largest tolerated gap between samples.
    pub max_price_sample_gap_secs: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load optional .env file before reading the environment
        dotenv::dotenv().ok();

        let config_builder = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .set_default("log_dir", "./logs")?
            .set_default("log_level", "info")?
            .set_default("file_log_level", "debug")?
            .set_default("simulation_mode", true)?
            .set_default("rpc_timeout_secs", 20)?
            .set_default("price_feed_url", "https://api.coingecko.com/api/v3")?
            .set_default("max_execution_attempts", 3)?
            .set_default("max_concurrent_tasks", 16)?
            .set_default("dispatch_tick_ms", 1000)?
            .set_default("time_poll_secs", 60)?
            .set_default("token_amount_poll_secs", 30)?
            .set_default("price_poll_secs", 10)?
            .set_default("max_price_sample_gap_secs", 600)?;

        let settings: Settings = config_builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.max_execution_attempts == 0 {
            return Err(config::ConfigError::Message(
                "max_execution_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(config::ConfigError::Message(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if [self.time_poll_secs, self.token_amount_poll_secs, self.price_poll_secs]
            .iter()
            .any(|secs| *secs == 0)
        {
            return Err(config::ConfigError::Message(
                "poll cadences must be non-zero".to_string(),
            ));
        }
        if self.max_price_sample_gap_secs == 0 || self.dispatch_tick_ms == 0 {
            return Err(config::ConfigError::Message(
                "max_price_sample_gap_secs and dispatch_tick_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// How long a task with this condition waits between evaluations.
    pub fn poll_interval(&self, condition: &Condition) -> Duration {
        let secs = match condition {
            Condition::Time(_) => self.time_poll_secs,
            Condition::TokenAmount(_) => self.token_amount_poll_secs,
            Condition::Price(_) => self.price_poll_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn rpc_url_override(&self, chain_id: u64) -> Option<&str> {
        self.rpc_url_overrides
            .get(&chain_id.to_string())
            .map(String::as_str)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_dir: "./logs".to_string(),
            log_level: "info".to_string(),
            file_log_level: "debug".to_string(),
            simulation_mode: true,
            metrics_port: None,
            rpc_timeout_secs: 20,
            rpc_url_overrides: HashMap::new(),
            price_feed_url: "https://api.coingecko.com/api/v3".to_string(),
            price_feed_api_key: None,
            max_execution_attempts: 3,
            max_concurrent_tasks: 16,
            dispatch_tick_ms: 1000,
            time_poll_secs: 60,
            token_amount_poll_secs: 30,
            price_poll_secs: 10,
            max_price_sample_gap_secs: 600,
        }
    }
}
