//! Sitemap discovery and bounded recursive resolution.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use url::Url;

use crate::normalize;

const MAX_SITEMAP_RECURSION_DEPTH: u32 = 3;
const WELL_KNOWN_SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/sitemaps.xml",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitemapSource {
    Sitemap,
    None,
}

#[derive(Debug, Clone)]
pub struct SitemapOutcome {
    pub urls: Vec<String>,
    pub source: SitemapSource,
    pub discovered_sitemap_files: Vec<String>,
}

/// Resolves sitemaps for an origin, caching the result for a short TTL so
/// repeated job starts against the same site don't re-fetch every time.
pub struct SitemapResolver {
    client: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, (Instant, SitemapOutcome)>>>,
    ttl: Duration,
}

impl SitemapResolver {
    pub fn new(ttl: Duration) -> Self {
        SitemapResolver {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("failed to build HTTP client"),
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Resolve sitemaps for `seed`'s origin, collecting up to `max_urls`
    /// same-origin `<loc>` entries. `robots_hints` are additional sitemap
    /// URLs discovered from robots.txt.
    pub async fn resolve(
        &self,
        seed: &Url,
        robots_hints: &[String],
        max_urls: usize,
    ) -> SitemapOutcome {
        let origin_key = seed.origin().ascii_serialization();

        if let Some((fetched_at, cached)) = self.cache.read().await.get(&origin_key) {
            if fetched_at.elapsed() < self.ttl {
                return cached.clone();
            }
        }

        let outcome = self.resolve_uncached(seed, robots_hints, max_urls).await;
        self.cache
            .write()
            .await
            .insert(origin_key, (Instant::now(), outcome.clone()));
        outcome
    }

    async fn resolve_uncached(
        &self,
        seed: &Url,
        robots_hints: &[String],
        max_urls: usize,
    ) -> SitemapOutcome {
        let origin = seed.origin().ascii_serialization();
        let mut candidates: Vec<String> = WELL_KNOWN_SITEMAP_PATHS
            .iter()
            .map(|p| format!("{origin}{p}"))
            .collect();
        candidates.extend(robots_hints.iter().cloned());

        let loc_re = Regex::new(r"(?s)<loc>\s*(.*?)\s*</loc>").expect("valid regex");
        let mut collected: Vec<String> = Vec::new();
        let mut seen_fingerprints: HashSet<String> = HashSet::new();
        let mut visited_sitemaps: HashSet<String> = HashSet::new();
        let mut discovered_sitemap_files: Vec<String> = Vec::new();

        for candidate in candidates {
            if collected.len() >= max_urls {
                break;
            }
            self.fetch_sitemap_recursive(
                &candidate,
                seed,
                0,
                max_urls,
                &loc_re,
                &mut collected,
                &mut seen_fingerprints,
                &mut visited_sitemaps,
                &mut discovered_sitemap_files,
            )
            .await;
        }

        let source = if collected.is_empty() {
            SitemapSource::None
        } else {
            SitemapSource::Sitemap
        };

        SitemapOutcome {
            urls: collected,
            source,
            discovered_sitemap_files,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_sitemap_recursive(
        &self,
        sitemap_url: &str,
        seed: &Url,
        depth: u32,
        max_urls: usize,
        loc_re: &Regex,
        collected: &mut Vec<String>,
        seen_fingerprints: &mut HashSet<String>,
        visited_sitemaps: &mut HashSet<String>,
        discovered_sitemap_files: &mut Vec<String>,
    ) {
        if depth > MAX_SITEMAP_RECURSION_DEPTH || collected.len() >= max_urls {
            return;
        }
        if !visited_sitemaps.insert(sitemap_url.to_string()) {
            return;
        }

        let xml = match self.fetch_xml(sitemap_url).await {
            Some(xml) => xml,
            None => return,
        };
        discovered_sitemap_files.push(sitemap_url.to_string());

        if xml.contains("<sitemapindex") {
            let child_urls: Vec<String> = loc_re
                .captures_iter(&xml)
                .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
                .collect();

            for child in child_urls {
                if collected.len() >= max_urls {
                    break;
                }
                Box::pin(self.fetch_sitemap_recursive(
                    &child,
                    seed,
                    depth + 1,
                    max_urls,
                    loc_re,
                    collected,
                    seen_fingerprints,
                    visited_sitemaps,
                    discovered_sitemap_files,
                ))
                .await;
            }
            return;
        }

        for cap in loc_re.captures_iter(&xml) {
            if collected.len() >= max_urls {
                break;
            }
            let Some(loc) = cap.get(1) else { continue };
            let Ok(parsed) = Url::parse(loc.as_str().trim()) else {
                continue;
            };
            if parsed.origin() != seed.origin() {
                continue;
            }
            let fp = normalize::fingerprint(&parsed, false);
            if seen_fingerprints.insert(fp) {
                collected.push(parsed.to_string());
            }
        }
    }

    async fn fetch_xml(&self, url: &str) -> Option<String> {
        let resp = self.client.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.text().await.ok()
    }
}
