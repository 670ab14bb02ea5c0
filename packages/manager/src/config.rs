use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// When set, every non-health request must present this token.
    pub api_token: Option<String>,
    /// Maximum silence tolerated from a worker before it is treated as offline.
    pub liveness_window: Duration,
    /// How often the stale-worker sweep runs.
    pub sweep_interval: Duration,
    /// Unacked deliveries allowed per broker consumer.
    pub prefetch: usize,
    /// Retry budget for broker deliveries (initial attempt not counted).
    pub max_retries: i64,
    /// Bounded capacity of each priority queue.
    pub queue_capacity: usize,
    /// Result ingester buffer size before a flush is forced.
    pub ingest_buffer_size: usize,
    /// Result ingester flush interval.
    pub ingest_flush_interval: Duration,
    /// Whether result flushes reconcile parent-job progress.
    pub sync_parent_progress: bool,
    /// Whether a worker-reported failure fails the parent job outright.
    pub worker_failure_fails_job: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://gmaps_fleet.db?mode=rwc".to_string(),
            port: 8080,
            api_token: None,
            liveness_window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            prefetch: 10,
            max_retries: 5,
            queue_capacity: 10_000,
            ingest_buffer_size: 50,
            ingest_flush_interval: Duration::from_secs(60),
            sync_parent_progress: true,
            worker_failure_fails_job: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = Config::default();
        Ok(Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            port: env_parse("PORT", defaults.port)?,
            api_token: env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),
            liveness_window: Duration::from_secs(env_parse(
                "WORKER_LIVENESS_SECS",
                defaults.liveness_window.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(env_parse(
                "WORKER_SWEEP_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
            prefetch: env_parse("BROKER_PREFETCH", defaults.prefetch)?,
            max_retries: env_parse("BROKER_MAX_RETRIES", defaults.max_retries)?,
            queue_capacity: env_parse("BROKER_QUEUE_CAPACITY", defaults.queue_capacity)?,
            ingest_buffer_size: env_parse("INGEST_BUFFER_SIZE", defaults.ingest_buffer_size)?,
            ingest_flush_interval: Duration::from_secs(env_parse(
                "INGEST_FLUSH_SECS",
                defaults.ingest_flush_interval.as_secs(),
            )?),
            sync_parent_progress: env_parse(
                "SYNC_PARENT_PROGRESS",
                defaults.sync_parent_progress,
            )?,
            worker_failure_fails_job: env_parse(
                "WORKER_FAILURE_FAILS_JOB",
                defaults.worker_failure_fails_job,
            )?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} must be a valid value")),
        Err(_) => Ok(default),
    }
}
