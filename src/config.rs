//! System-wide configuration, loaded from the environment at startup.
//!
//! Per-job knobs (`max_pages`, `max_depth`, ...) travel with each
//! [`crate::models::CrawlConfig`] instead; this struct holds the defaults for
//! those fields plus the ambient concerns that are not safe to let a caller
//! override per request (HMAC secret, worker/pool sizing, timeouts).

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub shared_secret: String,
    pub user_agent: String,

    /// Per-domain requests/second the fetcher's rate limiter allows.
    pub fetch_rate_per_second: u32,
    pub fetch_timeout_ms: u64,
    pub job_timeout_ms: u64,

    /// Workers a single job may run concurrently.
    pub max_workers_per_job: usize,
    /// Tasks a worker pulls off the queue per dequeue call.
    pub batch_size: usize,
    /// Total crawl workers live across the node at once, across all jobs.
    pub max_global_workers: usize,

    pub cache_ttl_secs: i64,
    pub sitemap_origin_cache_ttl_secs: u64,
    pub event_retention_secs: i64,
    pub heartbeat_interval_secs: u64,
    /// Quiescence window the orchestrator waits before trusting a
    /// `queue_depth == 0 && in_flight == 0` reading (guards against a race
    /// with a worker mid-admission).
    pub finalize_quiescence_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let shared_secret =
            env::var("SHARED_SECRET").map_err(|_| ConfigError::Missing("SHARED_SECRET"))?;

        let port = parse_env_or("PORT", 8080)?;
        let user_agent = env::var("USER_AGENT")
            .unwrap_or_else(|_| "docrawl/0.1 (+https://docrawl.dev/bot)".to_string());

        let fetch_rate_per_second = parse_env_or("FETCH_RATE_PER_SECOND", 4)?;
        let fetch_timeout_ms = parse_env_or("FETCH_TIMEOUT_MS", 8_000)?;
        let job_timeout_ms = parse_env_or("JOB_TIMEOUT_MS", 1_800_000)?;

        let max_workers_per_job = parse_env_or("MAX_WORKERS_PER_JOB", 5)?;
        let batch_size = parse_env_or("BATCH_SIZE", 20)?;
        let max_global_workers = parse_env_or("MAX_GLOBAL_WORKERS", 20)?;

        let cache_ttl_secs = parse_env_or("CACHE_TTL_SECS", 7 * 24 * 3600)?;
        let sitemap_origin_cache_ttl_secs = parse_env_or("SITEMAP_ORIGIN_CACHE_TTL_SECS", 3_600)?;
        let event_retention_secs = parse_env_or("EVENT_RETENTION_SECS", 24 * 3600)?;
        let heartbeat_interval_secs = parse_env_or("HEARTBEAT_INTERVAL_SECS", 15)?;
        let finalize_quiescence_ms = parse_env_or("FINALIZE_QUIESCENCE_MS", 500)?;

        Ok(Config {
            port,
            shared_secret,
            user_agent,
            fetch_rate_per_second,
            fetch_timeout_ms,
            job_timeout_ms,
            max_workers_per_job,
            batch_size,
            max_global_workers,
            cache_ttl_secs,
            sitemap_origin_cache_ttl_secs,
            event_retention_secs,
            heartbeat_interval_secs,
            finalize_quiescence_ms,
        })
    }
}

fn parse_env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, "failed to parse")),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_or_falls_back_to_default_when_unset() {
        std::env::remove_var("DOES_NOT_EXIST_XYZ");
        let v: u32 = parse_env_or("DOES_NOT_EXIST_XYZ", 42).unwrap();
        assert_eq!(v, 42);
    }
}
