//! Per-user content cache keyed by canonical URL, with lazy TTL expiry.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::UrlCacheEntry;

/// Best-effort cross-job content cache. Writes must never fail the caller;
/// misses (including expired entries) return `None` and the caller re-fetches.
#[async_trait]
pub trait ContentCache: Send + Sync {
    async fn get(&self, user_id: &str, url_hash: &str) -> Option<UrlCacheEntry>;

    async fn put(&self, user_id: &str, url_hash: &str, entry: UrlCacheEntry);
}

/// Default `ContentCache` collaborator. Expiry is lazy: an entry past its
/// TTL is simply not returned (and is swept out of the map) on the next read
/// that touches it, rather than by a background task.
pub struct InMemoryContentCache {
    entries: Arc<RwLock<HashMap<(String, String), UrlCacheEntry>>>,
}

impl InMemoryContentCache {
    pub fn new() -> Self {
        InMemoryContentCache {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryContentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentCache for InMemoryContentCache {
    async fn get(&self, user_id: &str, url_hash: &str) -> Option<UrlCacheEntry> {
        let key = (user_id.to_string(), url_hash.to_string());

        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if !entry.is_expired(Utc::now()) => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        self.entries.write().await.remove(&key);
        None
    }

    async fn put(&self, user_id: &str, url_hash: &str, entry: UrlCacheEntry) {
        let key = (user_id.to_string(), url_hash.to_string());
        self.entries.write().await.insert(key, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(ttl_secs: i64, age_secs: i64) -> UrlCacheEntry {
        UrlCacheEntry {
            title: Some("Guide".to_string()),
            content: "# Guide".to_string(),
            links: vec![],
            quality_score: 50,
            word_count: 10,
            cached_at: Utc::now() - Duration::seconds(age_secs),
            ttl_secs,
        }
    }

    #[tokio::test]
    async fn hit_returns_matching_entry() {
        let cache = InMemoryContentCache::new();
        cache.put("user-1", "hash-a", entry(3600, 0)).await;
        let hit = cache.get("user-1", "hash-a").await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_is_swept() {
        let cache = InMemoryContentCache::new();
        cache.put("user-1", "hash-a", entry(60, 120)).await;
        assert!(cache.get("user-1", "hash-a").await.is_none());
    }

    #[tokio::test]
    async fn miss_for_unknown_key() {
        let cache = InMemoryContentCache::new();
        assert!(cache.get("user-1", "does-not-exist").await.is_none());
    }
}
