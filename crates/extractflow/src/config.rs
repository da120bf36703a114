use std::time::Duration;

use crate::consumer::ConsumerOptions;
use crate::jobs::retry::RetryConfig;

/// Runtime configuration, loaded once from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub queue: String,
    pub lease_seconds: u64,
    pub batch_size: usize,
    pub reclaim_interval_ms: u64,
    pub api_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub max_payload_bytes: usize,
    pub max_attempts: i32,
    pub max_deliveries: i32,
    pub extract_timeout_ms: u64,
    pub max_concurrency: usize,
    /// `user=token` pairs, comma separated.
    pub api_tokens: Option<String>,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("EXTRACTFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let queue = env_or_fallback("EXTRACTFLOW_QUEUE", "QUEUE")
            .unwrap_or_else(|| "extract".to_string());

        let lease_seconds = parsed::<u64>("EXTRACTFLOW_LEASE_SECONDS", "LEASE_SECONDS", 30).max(1);

        let batch_size = parsed::<usize>("EXTRACTFLOW_BATCH_SIZE", "BATCH_SIZE", 10).clamp(1, 500);

        let reclaim_interval_ms =
            parsed::<u64>("EXTRACTFLOW_RECLAIM_INTERVAL_MS", "RECLAIM_INTERVAL_MS", 5_000);

        let api_addr = env_or_fallback("EXTRACTFLOW_API_ADDR", "API_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("EXTRACTFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let max_payload_bytes =
            parsed::<usize>("EXTRACTFLOW_MAX_PAYLOAD_BYTES", "MAX_PAYLOAD_BYTES", 256 * 1024);

        let max_attempts = parsed::<i32>("EXTRACTFLOW_MAX_ATTEMPTS", "MAX_ATTEMPTS", 5).max(1);

        let max_deliveries = parsed::<i32>("EXTRACTFLOW_MAX_DELIVERIES", "MAX_DELIVERIES", 10)
            .max(max_attempts);

        let extract_timeout_ms =
            parsed::<u64>("EXTRACTFLOW_EXTRACT_TIMEOUT_MS", "EXTRACT_TIMEOUT_MS", 10_000);

        let max_concurrency =
            parsed::<usize>("EXTRACTFLOW_MAX_CONCURRENCY", "MAX_CONCURRENCY", 16).max(1);

        let api_tokens = env_or_fallback("EXTRACTFLOW_API_TOKENS", "API_TOKENS");

        let log_json = env_bool("EXTRACTFLOW_LOG_JSON").unwrap_or(false);

        Ok(Self {
            database_url,
            worker_id,
            queue,
            lease_seconds,
            batch_size,
            reclaim_interval_ms,
            api_addr,
            migrate_on_startup,
            max_payload_bytes,
            max_attempts,
            max_deliveries,
            extract_timeout_ms,
            max_concurrency,
            api_tokens,
            log_json,
        })
    }

    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            consumer_id: self.worker_id.clone(),
            batch_size: self.batch_size,
            visibility: Duration::from_secs(self.lease_seconds),
            reclaim_interval: Duration::from_millis(self.reclaim_interval_ms),
            max_attempts: self.max_attempts,
            max_deliveries: self.max_deliveries,
            // 0 disables the timeout
            extract_timeout: (self.extract_timeout_ms > 0)
                .then(|| Duration::from_millis(self.extract_timeout_ms)),
            max_concurrency: self.max_concurrency,
            retry: RetryConfig::default(),
            ..ConsumerOptions::default()
        }
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn parsed<T: std::str::FromStr>(primary: &str, fallback: &str, default: T) -> T {
    env_or_fallback(primary, fallback)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
