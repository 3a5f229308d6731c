use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const CONFIG_DIR: &str = "config";
const DEFAULT_QUEUE_NAMESPACE: &str = "storefront:mq";
const DEFAULT_METRICS_QUEUE: &str = "metrics";
// Every five minutes, matching the per-store rollup cadence.
const DEFAULT_STORE_METRICS_CRON: &str = "0 */5 * * * *";

/// Application configuration, layered from `config/*.toml` files and
/// `APP__`-prefixed environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL (postgres or sqlite).
    pub database_url: String,

    /// Redis connection URL for the work queue broker.
    pub redis_url: String,

    /// Deployment environment name.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log filter, e.g. "info" or "storefront_core=debug".
    #[serde(default)]
    pub log_level: Option<String>,

    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub log_json: bool,

    /// Run pending migrations at startup.
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    #[validate(range(min = 1))]
    pub db_min_connections: u32,

    /// Key prefix for broker lists.
    #[serde(default = "default_queue_namespace")]
    pub queue_namespace: String,

    /// Queue the metric aggregation jobs are routed to.
    #[serde(default = "default_metrics_queue")]
    pub metrics_queue: String,

    /// Upper bound on the scheduler polling interval, in seconds.
    #[serde(default = "default_scheduler_max_interval_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub scheduler_max_interval_secs: u64,

    /// Blocking-pop timeout for queue consumers, in seconds.
    #[serde(default = "default_worker_block_timeout_secs")]
    #[validate(range(min = 1, max = 60))]
    pub worker_block_timeout_secs: u64,

    /// Number of worker tasks consuming the metrics queue.
    #[serde(default = "default_worker_concurrency")]
    #[validate(range(min = 1, max = 64))]
    pub worker_concurrency: usize,

    /// Products whose total remaining stock is below this are reported low.
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i64,

    /// Recurrence for per-store metric rollups (six-field cron).
    #[serde(default = "default_store_metrics_cron")]
    pub store_metrics_cron: String,
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_queue_namespace() -> String {
    DEFAULT_QUEUE_NAMESPACE.to_string()
}

fn default_metrics_queue() -> String {
    DEFAULT_METRICS_QUEUE.to_string()
}

fn default_scheduler_max_interval_secs() -> u64 {
    30
}

fn default_worker_block_timeout_secs() -> u64 {
    5
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_low_stock_threshold() -> i64 {
    3
}

fn default_store_metrics_cron() -> String {
    DEFAULT_STORE_METRICS_CRON.to_string()
}

impl AppConfig {
    /// Minimal constructor used by tests and embedded setups.
    pub fn new(database_url: String, redis_url: String) -> Self {
        Self {
            database_url,
            redis_url,
            environment: default_environment(),
            log_level: None,
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            queue_namespace: default_queue_namespace(),
            metrics_queue: default_metrics_queue(),
            scheduler_max_interval_secs: default_scheduler_max_interval_secs(),
            worker_block_timeout_secs: default_worker_block_timeout_secs(),
            worker_concurrency: default_worker_concurrency(),
            low_stock_threshold: default_low_stock_threshold(),
            store_metrics_cron: default_store_metrics_cron(),
        }
    }

    /// Loads configuration: `config/default.toml`, then
    /// `config/{environment}.toml`, then `APP__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let mut builder = Config::builder();

        let default_path = Path::new(CONFIG_DIR).join("default");
        builder = builder.add_source(File::with_name(default_path.to_str().unwrap()).required(false));

        let env_path = Path::new(CONFIG_DIR).join(&environment);
        builder = builder.add_source(File::with_name(env_path.to_str().unwrap()).required(false));

        builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config
            .validate()
            .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

        info!(environment = %config.environment, "configuration loaded");
        Ok(config)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn is_development(&self) -> bool {
        self.environment == DEFAULT_ENV
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "redis://127.0.0.1:6379".to_string(),
        );
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.scheduler_max_interval_secs, 30);
        assert_eq!(cfg.metrics_queue, "metrics");
        assert_eq!(cfg.low_stock_threshold, 3);
        assert!(cfg.is_development());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "redis://127.0.0.1:6379".to_string(),
        );
        cfg.scheduler_max_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
