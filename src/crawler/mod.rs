//! Ties the fetcher (its network step) to the content extractor for a
//! single URL. The worker pool in [`crate::jobs`] drives this per task; the
//! orchestration, caching, and persistence around it live there since they
//! need the shared store/cache/queue/event-log collaborators this module
//! deliberately stays unaware of.

pub mod content;
pub mod fetcher;
pub mod robots;
pub mod sitemap;

use thiserror::Error;

use crate::models::ExtractedPage;
use fetcher::{FetchResult, RateLimitedFetcher};

#[derive(Debug, Error)]
pub enum CrawlEngineError {
    #[error("fetch error: {0}")]
    FetchError(String),
    #[error("parse error: {0}")]
    ParseError(String),
}

/// Fetch one URL and extract its documentation content. Network failure and
/// extraction failure are distinguished so the caller can record the right
/// `PageStatus`/event without re-deriving it from a string.
pub struct CrawlEngine {
    pub fetcher: RateLimitedFetcher,
}

impl CrawlEngine {
    pub fn new(fetcher: RateLimitedFetcher) -> Self {
        CrawlEngine { fetcher }
    }

    /// Fetch `url` over HTTP. Non-2xx responses are returned, not treated as
    /// errors — the caller decides how to record them.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, CrawlEngineError> {
        self.fetcher
            .fetch(url)
            .await
            .map_err(|e| CrawlEngineError::FetchError(e.to_string()))
    }

    /// Extract Markdown content from a fetched page.
    pub fn extract(&self, html: &str, source_url: &str) -> Result<ExtractedPage, CrawlEngineError> {
        content::extract(html, source_url).map_err(|e| CrawlEngineError::ParseError(e.to_string()))
    }
}
