//! Durable job/page/chunk storage behind a trait, so the crawl engine is not
//! wedded to one persistence backend. The in-memory implementation is the
//! default collaborator used when no external store is wired in.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{CrawledPage, Job, JobStatus, PageContentChunk};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("state_version conflict updating job {0}: expected {expected}, found {found}", expected = .1, found = .2)]
    VersionConflict(String, u64, u64),
}

/// Durable storage for jobs, crawled pages, and their content chunks.
///
/// Job writes use optimistic concurrency (`state_version` compare-and-swap)
/// so concurrent workers never clobber each other's progress updates.
/// `CrawledPage` insertion is the at-most-once serialization point keyed on
/// `(job_id, url_hash)`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: Job) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    async fn list_jobs_for_user(&self, user_id: &str) -> Result<Vec<Job>, StoreError>;

    /// Compare-and-swap update: `mutator` receives the current job and
    /// returns the new one. Fails with `VersionConflict` if `state_version`
    /// changed between read and write (the caller should retry).
    ///
    /// Takes a boxed closure rather than a generic so the trait stays
    /// object-safe — callers hold `Arc<dyn JobStore>`, not a concrete type.
    async fn update_job(
        &self,
        job_id: &str,
        mutator: Box<dyn FnOnce(&mut Job) + Send>,
    ) -> Result<Job, StoreError>;

    /// Atomic increment of the job's progress counters; does not require a
    /// CAS retry loop from the caller.
    async fn increment_progress(
        &self,
        job_id: &str,
        processed: u32,
        discovered: u32,
        failed: u32,
        words: u64,
    ) -> Result<(), StoreError>;

    /// Insert a page row. Returns `Ok(false)` without error on a
    /// `(job_id, url_hash)` conflict — the caller discards its work silently.
    async fn insert_page(&self, page: CrawledPage) -> Result<bool, StoreError>;

    async fn list_pages(&self, job_id: &str) -> Result<Vec<CrawledPage>, StoreError>;

    async fn insert_chunk(&self, chunk: PageContentChunk) -> Result<(), StoreError>;

    async fn get_chunk(&self, page_id: &str) -> Result<Option<PageContentChunk>, StoreError>;

    /// Persist the finalized combined Markdown artifact for a completed job.
    async fn save_artifact(&self, job_id: &str, content: String) -> Result<(), StoreError>;

    async fn get_artifact(&self, job_id: &str) -> Result<Option<String>, StoreError>;
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    pages: HashMap<String, Vec<CrawledPage>>,
    page_index: HashMap<(String, String), ()>,
    chunks: HashMap<String, PageContentChunk>,
    artifacts: HashMap<String, String>,
}

/// Default `JobStore` collaborator: everything lives in process memory,
/// guarded by a single `RwLock`. Fine for a single-node deployment; a
/// production backend would swap this for a real database without changing
/// any caller.
pub struct InMemoryJobStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        InMemoryJobStore {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: Job) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.pages.insert(job.id.clone(), Vec::new());
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.read().await.jobs.get(job_id).cloned())
    }

    async fn list_jobs_for_user(&self, user_id: &str) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_job(
        &self,
        job_id: &str,
        mutator: Box<dyn FnOnce(&mut Job) + Send>,
    ) -> Result<Job, StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        mutator(job);
        job.state_version += 1;
        job.updated_at = Utc::now();
        if job.status.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(job.updated_at);
        }
        Ok(job.clone())
    }

    async fn increment_progress(
        &self,
        job_id: &str,
        processed: u32,
        discovered: u32,
        failed: u32,
        words: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        job.progress_summary.processed += processed;
        job.progress_summary.discovered += discovered;
        job.progress_summary.failed += failed;
        job.progress_summary.total_words += words;
        job.state_version += 1;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_page(&self, page: CrawledPage) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (page.job_id.clone(), page.url_hash.clone());
        if inner.page_index.contains_key(&key) {
            return Ok(false);
        }
        inner.page_index.insert(key, ());
        inner
            .pages
            .entry(page.job_id.clone())
            .or_default()
            .push(page);
        Ok(true)
    }

    async fn list_pages(&self, job_id: &str) -> Result<Vec<CrawledPage>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .pages
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_chunk(&self, chunk: PageContentChunk) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .chunks
            .insert(chunk.page_id.clone(), chunk);
        Ok(())
    }

    async fn get_chunk(&self, page_id: &str) -> Result<Option<PageContentChunk>, StoreError> {
        Ok(self.inner.read().await.chunks.get(page_id).cloned())
    }

    async fn save_artifact(&self, job_id: &str, content: String) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .artifacts
            .insert(job_id.to_string(), content);
        Ok(())
    }

    async fn get_artifact(&self, job_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().await.artifacts.get(job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CrawlConfig;

    fn sample_job(id: &str) -> Job {
        Job::new(
            id.to_string(),
            "user-1".to_string(),
            "https://docs.example.com/guide".to_string(),
            CrawlConfig::default(),
        )
    }

    #[tokio::test]
    async fn state_version_increments_on_every_update() {
        let store = InMemoryJobStore::new();
        store.create_job(sample_job("job-1")).await.unwrap();

        let updated = store
            .update_job("job-1", Box::new(|j| j.status = JobStatus::Processing))
            .await
            .unwrap();
        assert_eq!(updated.state_version, 1);

        let updated_again = store
            .update_job("job-1", Box::new(|j| j.status = JobStatus::Completed))
            .await
            .unwrap();
        assert_eq!(updated_again.state_version, 2);
        assert!(updated_again.completed_at.is_some());
    }

    #[tokio::test]
    async fn insert_page_rejects_duplicate_url_hash() {
        let store = InMemoryJobStore::new();
        store.create_job(sample_job("job-1")).await.unwrap();

        let page = CrawledPage {
            id: "p1".to_string(),
            job_id: "job-1".to_string(),
            url: "https://docs.example.com/guide/intro".to_string(),
            url_hash: "abc123".to_string(),
            title: None,
            depth: 0,
            http_status: Some(200),
            status: crate::models::PageStatus::Crawled,
            error_message: None,
            quality_score: 40,
            word_count: 100,
            crawled_at: Utc::now(),
        };

        assert!(store.insert_page(page.clone()).await.unwrap());
        assert!(!store.insert_page(page).await.unwrap());
        assert_eq!(store.list_pages("job-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn increment_progress_is_additive() {
        let store = InMemoryJobStore::new();
        store.create_job(sample_job("job-1")).await.unwrap();

        store
            .increment_progress("job-1", 1, 2, 0, 50)
            .await
            .unwrap();
        store
            .increment_progress("job-1", 1, 0, 1, 25)
            .await
            .unwrap();

        let job = store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.progress_summary.processed, 2);
        assert_eq!(job.progress_summary.discovered, 2);
        assert_eq!(job.progress_summary.failed, 1);
        assert_eq!(job.progress_summary.total_words, 75);
    }
}
