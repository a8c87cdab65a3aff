use governor::{Quota, RateLimiter};
use reqwest::Client;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Result of a successful HTTP fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status_code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub final_url: String,
}

type DomainLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// HTTP fetcher with per-domain rate limiting.
///
/// Each domain gets its own rate limiter so a single slow/misbehaving domain
/// can't bottleneck an unrelated crawl job sharing the same process.
#[derive(Clone)]
pub struct RateLimitedFetcher {
    client: Client,
    domain_limiters: Arc<RwLock<HashMap<String, Arc<DomainLimiter>>>>,
    rate_per_second: u32,
}

impl RateLimitedFetcher {
    /// Create a new rate-limited fetcher.
    ///
    /// - `rate_per_second`: maximum requests per second per domain.
    /// - `timeout_ms`: per-request timeout.
    /// - `user_agent`: custom User-Agent header string.
    pub fn new(rate_per_second: u32, timeout_ms: u64, user_agent: &str) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .pool_max_idle_per_host(20)
            .build()
            .expect("failed to build HTTP client");

        RateLimitedFetcher {
            client,
            domain_limiters: Arc::new(RwLock::new(HashMap::new())),
            rate_per_second: rate_per_second.max(1),
        }
    }

    async fn get_limiter(&self, domain: &str) -> Arc<DomainLimiter> {
        {
            let limiters = self.domain_limiters.read().await;
            if let Some(limiter) = limiters.get(domain) {
                return limiter.clone();
            }
        }

        let mut limiters = self.domain_limiters.write().await;
        limiters
            .entry(domain.to_string())
            .or_insert_with(|| {
                let rate = NonZeroU32::new(self.rate_per_second).unwrap();
                Arc::new(RateLimiter::direct(Quota::per_second(rate)))
            })
            .clone()
    }

    /// Fetch a URL, waiting for per-domain rate-limit clearance first.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let domain = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;

        let limiter = self.get_limiter(&domain).await;
        limiter.until_ready().await;

        let response = self.client.get(url).send().await?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();

        let mut headers = HashMap::new();
        for (name, value) in response.headers().iter() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let body = response.text().await?;

        Ok(FetchResult {
            status_code,
            body,
            headers,
            final_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparsable_url_without_panicking() {
        let fetcher = RateLimitedFetcher::new(2, 1000, "docrawl/0.1");
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(fetcher.fetch("not a url"));
        assert!(result.is_err());
    }
}
