//! robots.txt is consulted only for sitemap discovery hints, per this
//! crawler's scope — it does not enforce Disallow rules.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RobotsError {
    #[error("failed to fetch robots.txt: {0}")]
    FetchError(#[from] reqwest::Error),
}

/// robots.txt, reduced to the one thing this crawler cares about: the
/// `Sitemap:` directives that seed C3's sitemap resolution.
pub struct RobotsHints {
    pub sitemaps: Vec<String>,
}

impl RobotsHints {
    /// Fetch and parse `https://{domain}/robots.txt`. A missing or
    /// unreachable robots.txt yields an empty hint set rather than an error —
    /// sitemap discovery falls back to well-known paths.
    pub async fn fetch(domain: &str) -> Self {
        let url = format!("https://{domain}/robots.txt");
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(c) => c,
            Err(_) => return RobotsHints { sitemaps: vec![] },
        };

        let body = match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
            _ => return RobotsHints { sitemaps: vec![] },
        };

        RobotsHints {
            sitemaps: Self::parse_sitemap_lines(&body),
        }
    }

    /// Parse raw robots.txt content (exposed for deterministic tests).
    pub fn from_content(content: &str) -> Self {
        RobotsHints {
            sitemaps: Self::parse_sitemap_lines(content),
        }
    }

    fn parse_sitemap_lines(content: &str) -> Vec<String> {
        content
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                let rest = line
                    .strip_prefix("Sitemap:")
                    .or_else(|| line.strip_prefix("sitemap:"))?;
                let url = rest.trim();
                if url.is_empty() {
                    None
                } else {
                    Some(url.to_string())
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sitemap_directives() {
        let content = "User-agent: *\nDisallow: /admin/\nSitemap: https://example.com/sitemap.xml\nSitemap: https://example.com/sitemap2.xml\n";
        let hints = RobotsHints::from_content(content);
        assert_eq!(
            hints.sitemaps,
            vec![
                "https://example.com/sitemap.xml".to_string(),
                "https://example.com/sitemap2.xml".to_string(),
            ]
        );
    }

    #[test]
    fn no_sitemap_directives_yields_empty_vec() {
        let hints = RobotsHints::from_content("User-agent: *\nDisallow: /\n");
        assert!(hints.sitemaps.is_empty());
    }
}
