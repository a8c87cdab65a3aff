//! Job orchestration state machine and the bounded-parallel worker pool
//! that drains a job's admission queue. `JobManager` is the single
//! entry point the HTTP layer talks to; everything below `submit`/`cancel`/
//! `job_state` runs on background tasks coordinating purely through the
//! store/queue/cache/event-log collaborators so no lock is held across an
//! await boundary longer than a single operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::cache::{ContentCache, InMemoryContentCache};
use crate::config::Config;
use crate::crawler::fetcher::RateLimitedFetcher;
use crate::crawler::robots::RobotsHints;
use crate::crawler::sitemap::{SitemapOutcome, SitemapResolver, SitemapSource};
use crate::crawler::CrawlEngine;
use crate::events::{EventLog, InMemoryEventLog};
use crate::models::*;
use crate::normalize;
use crate::queue::{InMemoryWorkQueue, WorkQueue};
use crate::store::{InMemoryJobStore, JobStore};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("job not found")]
    NotFound,
    #[error("store error: {0}")]
    Store(String),
}

/// Everything a background job task needs, bundled so it can be cloned once
/// per spawn instead of threading a dozen individual arguments through.
#[derive(Clone)]
struct Collaborators {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    cache: Arc<dyn ContentCache>,
    events: Arc<dyn EventLog>,
    engine: Arc<CrawlEngine>,
    sitemap: Arc<SitemapResolver>,
    config: Arc<Config>,
    global_workers: Arc<Semaphore>,
}

/// Manages crawl job lifecycle end to end: submission, the discovery and
/// worker-pool phases, cancellation, and the read paths the HTTP layer needs
/// (state summary, active-job listing, artifact download).
pub struct JobManager {
    collaborators: Collaborators,
    cancel_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl JobManager {
    pub fn new(config: Arc<Config>) -> Self {
        let fetcher = RateLimitedFetcher::new(
            config.fetch_rate_per_second,
            config.fetch_timeout_ms,
            &config.user_agent,
        );
        let engine = Arc::new(CrawlEngine::new(fetcher));
        let sitemap = Arc::new(SitemapResolver::new(Duration::from_secs(
            config.sitemap_origin_cache_ttl_secs,
        )));

        let collaborators = Collaborators {
            store: Arc::new(InMemoryJobStore::new()),
            queue: Arc::new(InMemoryWorkQueue::new()),
            cache: Arc::new(InMemoryContentCache::new()),
            events: Arc::new(InMemoryEventLog::new()),
            engine,
            sitemap,
            global_workers: Arc::new(Semaphore::new(config.max_global_workers)),
            config,
        };

        JobManager {
            collaborators,
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn events(&self) -> Arc<dyn EventLog> {
        self.collaborators.events.clone()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.collaborators.config.heartbeat_interval_secs)
    }

    /// Validate and admit a new crawl job, then hand it to a background task
    /// (the `start-crawl` work item). Returns as soon as the job row
    /// exists — discovery and crawling happen asynchronously.
    pub async fn submit(&self, user_id: &str, req: SubmitCrawlRequest) -> Result<Job, SubmitError> {
        let trimmed = req.url.trim();
        let seed = Url::parse(trimmed)
            .map_err(|_| SubmitError::InvalidInput("url must be an absolute URL".to_string()))?;
        if seed.scheme() != "http" && seed.scheme() != "https" {
            return Err(SubmitError::InvalidInput(
                "url must use the http or https scheme".to_string(),
            ));
        }

        let config = req.config.unwrap_or_default();
        if config.max_pages == 0 {
            return Err(SubmitError::InvalidInput(
                "config.max_pages must be at least 1".to_string(),
            ));
        }

        // Canonicalize the seed the same way every discovered URL is
        // canonicalized, so path-prefix scoping and fingerprinting treat it
        // consistently with the rest of the crawl.
        let seed = normalize::normalize(seed.as_str(), &seed, true, false)
            .ok_or_else(|| SubmitError::InvalidInput("url must be an absolute URL".to_string()))?;

        let job_id = Uuid::new_v4().to_string();
        let job = Job::new(job_id.clone(), user_id.to_string(), seed.to_string(), config);

        self.collaborators
            .store
            .create_job(job.clone())
            .await
            .map_err(|e| SubmitError::Store(e.to_string()))?;

        let cancel_token = CancellationToken::new();
        self.cancel_tokens
            .write()
            .await
            .insert(job_id.clone(), cancel_token.clone());

        let collaborators = self.collaborators.clone();
        tokio::spawn(async move {
            run_job(collaborators, job_id, cancel_token).await;
        });

        Ok(job)
    }

    async fn owned_job(&self, user_id: &str, job_id: &str) -> Result<Job, SubmitError> {
        let job = self
            .collaborators
            .store
            .get_job(job_id)
            .await
            .map_err(|e| SubmitError::Store(e.to_string()))?
            .ok_or(SubmitError::NotFound)?;
        if job.user_id != user_id {
            return Err(SubmitError::NotFound);
        }
        Ok(job)
    }

    /// Cancel a running job. Already-terminal jobs are returned unchanged —
    /// cancellation is not itself an error in that case.
    pub async fn cancel(&self, user_id: &str, job_id: &str) -> Result<Job, SubmitError> {
        let job = self.owned_job(user_id, job_id).await?;

        if let Some(token) = self.cancel_tokens.read().await.get(job_id) {
            token.cancel();
        }

        if job.status.is_terminal() {
            return Ok(job);
        }

        let cancelled = self
            .collaborators
            .store
            .update_job(
                job_id,
                Box::new(|j| {
                    j.status = JobStatus::Cancelled;
                    j.status_message = Some("cancelled".to_string());
                }),
            )
            .await
            .map_err(|e| SubmitError::Store(e.to_string()))?;
        self.collaborators.queue.clear(job_id).await;
        schedule_event_eviction(&self.collaborators, job_id);
        Ok(cancelled)
    }

    pub async fn job_state(&self, user_id: &str, job_id: &str) -> Result<JobStateResponse, SubmitError> {
        let job = self.owned_job(user_id, job_id).await?;
        let events = self.collaborators.events.read_since(job_id, None).await;

        let recent_activity: Vec<RecentActivityItem> = events
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(RecentActivityItem::from)
            .collect();
        let last_event_id = events.last().map(|e| e.event_id).unwrap_or(0);

        Ok(JobStateResponse {
            success: true,
            status: job.status,
            total_processed: job.progress_summary.processed,
            total_discovered: job.progress_summary.discovered,
            recent_activity,
            last_event_id,
            error: job.error_message,
        })
    }

    /// All non-terminal jobs for `user_id`.
    pub async fn active_jobs(&self, user_id: &str) -> Vec<ActiveJobEntry> {
        let jobs = self
            .collaborators
            .store
            .list_jobs_for_user(user_id)
            .await
            .unwrap_or_default();

        let mut out = Vec::new();
        for job in jobs
            .into_iter()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Processing))
        {
            if let Ok(statistics) = self.job_state(user_id, &job.id).await {
                out.push(ActiveJobEntry {
                    job_id: job.id,
                    seed_url: job.seed_url,
                    status: job.status,
                    statistics,
                });
            }
        }
        out
    }

    /// The combined Markdown artifact for a completed job, plus the download
    /// filename. `NotFound` covers both "no such job" and "not completed yet"
    /// — both map to 404 at the HTTP layer per spec.
    pub async fn download_artifact(
        &self,
        user_id: &str,
        job_id: &str,
    ) -> Result<(String, String), SubmitError> {
        let job = self.owned_job(user_id, job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(SubmitError::NotFound);
        }

        let content = self
            .collaborators
            .store
            .get_artifact(job_id)
            .await
            .map_err(|e| SubmitError::Store(e.to_string()))?
            .ok_or(SubmitError::NotFound)?;

        let host = Url::parse(&job.seed_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "docs".to_string());
        let date = Utc::now().format("%Y-%m-%d");
        Ok((format!("{host}-{date}.md"), content))
    }
}

/// Drives one job from `pending` through discovery, the worker pool, and
/// finalization. Runs entirely on a background task; the only way the HTTP
/// layer observes progress is through the store (state polling) and event
/// log (the subscription bridge).
async fn run_job(c: Collaborators, job_id: String, cancel: CancellationToken) {
    let Ok(Some(job)) = c.store.get_job(&job_id).await else {
        return;
    };
    // Idempotency: a retried start-crawl against a job that already left
    // `pending` (e.g. a duplicate dispatch) is a no-op.
    if job.status != JobStatus::Pending {
        return;
    }

    let Ok(seed) = Url::parse(&job.seed_url) else {
        fail_job(&c, &job_id, &job.user_id, "seed URL failed to re-parse").await;
        return;
    };

    let _ = c
        .store
        .update_job(&job_id, Box::new(|j| j.status = JobStatus::Processing))
        .await;
    c.events
        .append(
            &job_id,
            &job.user_id,
            EventPayload::DiscoveryStarted {
                job_id: job_id.clone(),
            },
        )
        .await;

    let started = Instant::now();

    run_discovery(&c, &job_id, &job.user_id, &seed, &job.config).await;

    if cancel.is_cancelled() {
        return;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut workers = tokio::task::JoinSet::new();
    for _ in 0..c.config.max_workers_per_job.max(1) {
        let c2 = c.clone();
        let job_id2 = job_id.clone();
        let seed2 = seed.clone();
        let cancel2 = cancel.clone();
        let stop2 = stop.clone();
        workers.spawn(async move {
            let _permit = c2.global_workers.clone().acquire_owned().await.ok();
            worker_loop(c2, job_id2, seed2, cancel2, stop2).await;
        });
    }

    loop {
        if cancel.is_cancelled() {
            break;
        }
        if let Ok(Some(current)) = c.store.get_job(&job_id).await {
            if current.status.is_terminal() {
                break;
            }
        }
        if started.elapsed().as_millis() as u64 > c.config.job_timeout_ms {
            stop.store(true, Ordering::SeqCst);
            cancel.cancel();
            while workers.join_next().await.is_some() {}
            timeout_job(&c, &job_id).await;
            return;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;

        let depth = c.queue.queue_depth(&job_id).await;
        let in_flight = c.queue.in_flight(&job_id).await;
        if depth == 0 && in_flight == 0 {
            tokio::time::sleep(Duration::from_millis(c.config.finalize_quiescence_ms)).await;
            let depth_again = c.queue.queue_depth(&job_id).await;
            let in_flight_again = c.queue.in_flight(&job_id).await;
            if depth_again == 0 && in_flight_again == 0 {
                break;
            }
        }
    }

    stop.store(true, Ordering::SeqCst);
    while workers.join_next().await.is_some() {}

    if !cancel.is_cancelled() {
        finalize_job(&c, &job_id).await;
    }
}

/// Seed the queue from sitemap discovery. The seed URL itself
/// bypasses `is_documentation_like` — it is the trusted starting point — but
/// every sitemap-discovered URL still runs the full C1 admission gauntlet.
async fn run_discovery(c: &Collaborators, job_id: &str, user_id: &str, seed: &Url, config: &CrawlConfig) {
    let domain = seed.host_str().unwrap_or_default().to_string();
    let robots_hints = RobotsHints::fetch(&domain).await;

    let sitemap_outcome = if config.follow_sitemaps {
        c.sitemap
            .resolve(seed, &robots_hints.sitemaps, config.max_pages as usize)
            .await
    } else {
        SitemapOutcome {
            urls: vec![],
            source: SitemapSource::None,
            discovered_sitemap_files: vec![],
        }
    };

    c.queue.enqueue(job_id, seed.as_str(), 0).await;

    let mut admitted: u32 = 1;
    let mut discovered_this_round: u32 = 0;
    // A sitemap URL is enqueued at depth 1, so `max_depth=0` (seed only)
    // must skip sitemap admission entirely rather than fetch them anyway.
    if config.max_depth > 0 {
        for raw in &sitemap_outcome.urls {
            if admitted >= config.max_pages {
                break;
            }
            let Some(normalized) = normalize::normalize(raw, seed, false, false) else {
                continue;
            };
            if &normalized == seed {
                continue;
            }
            if !normalize::within_path_prefix(&normalized, seed) {
                continue;
            }
            if !normalize::is_documentation_like(&normalized) {
                continue;
            }
            if c.queue.enqueue(job_id, normalized.as_str(), 1).await {
                admitted += 1;
                discovered_this_round += 1;
            }
        }
    }

    let _ = c.store.increment_progress(job_id, 0, admitted, 0, 0).await;

    if discovered_this_round > 0 {
        c.events
            .append(
                job_id,
                user_id,
                EventPayload::UrlsDiscovered {
                    count: discovered_this_round,
                    depth: 1,
                    total_discovered: admitted,
                },
            )
            .await;
    }
}

async fn worker_loop(
    c: Collaborators,
    job_id: String,
    seed: Url,
    cancel: CancellationToken,
    stop: Arc<AtomicBool>,
) {
    loop {
        if cancel.is_cancelled() || stop.load(Ordering::SeqCst) {
            return;
        }

        let tasks = c.queue.dequeue(&job_id, c.config.batch_size).await;
        if tasks.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        }

        let n = tasks.len() as u32;
        c.queue.mark_in_flight(&job_id, n).await;

        for task in tasks {
            if cancel.is_cancelled() {
                break;
            }
            process_task(&c, &job_id, &seed, task).await;
        }

        c.queue.release_in_flight(&job_id, n).await;
    }
}

/// One task through the fetch pipeline: cache lookup, fetch, extract,
/// persist, admit discovered links.
async fn process_task(c: &Collaborators, job_id: &str, seed: &Url, task: QueueTask) {
    let Ok(Some(job)) = c.store.get_job(job_id).await else {
        return;
    };
    if job.status.is_terminal() {
        return;
    }
    if task.depth > job.config.max_depth {
        return;
    }

    let Ok(url) = Url::parse(&task.url) else {
        return;
    };
    let url_hash = normalize::fingerprint(&url, false);

    let mut from_cache = false;
    let mut extracted: Option<ExtractedPage> = None;
    let mut http_status: Option<u16> = None;
    let mut failure: Option<String> = None;

    if !job.config.force_refresh {
        if let Some(cached) = c.cache.get(&job.user_id, &url_hash).await {
            from_cache = true;
            extracted = Some(ExtractedPage {
                title: cached.title,
                content_markdown: cached.content,
                outbound_links: cached.links,
                quality_score: cached.quality_score,
                word_count: cached.word_count,
            });
        }
    }

    if extracted.is_none() {
        match c.engine.fetch(url.as_str()).await {
            Ok(fetch_result) => {
                http_status = Some(fetch_result.status_code);
                if (200..300).contains(&fetch_result.status_code) {
                    match c.engine.extract(&fetch_result.body, &fetch_result.final_url) {
                        Ok(page) => extracted = Some(page),
                        Err(e) => failure = Some(e.to_string()),
                    }
                } else {
                    failure = Some(format!("http status {}", fetch_result.status_code));
                }
            }
            Err(e) => failure = Some(e.to_string()),
        }
    }

    let Some(page_data) = extracted else {
        record_failed_page(c, job_id, &job.user_id, &url, &url_hash, task.depth, http_status, failure)
            .await;
        return;
    };

    let counts_as_processed = (page_data.quality_score as u32) >= job.config.quality_threshold;

    let page = CrawledPage {
        id: Uuid::new_v4().to_string(),
        job_id: job_id.to_string(),
        url: url.to_string(),
        url_hash: url_hash.clone(),
        title: page_data.title.clone(),
        depth: task.depth,
        http_status,
        status: PageStatus::Crawled,
        error_message: None,
        quality_score: page_data.quality_score,
        word_count: page_data.word_count,
        crawled_at: Utc::now(),
    };

    let inserted = c.store.insert_page(page.clone()).await.unwrap_or(false);

    if !inserted {
        // A sibling worker already claimed (job_id, url_hash) — this is the
        // serialization point for at-most-once storage. Our work is
        // discarded, but the cache still benefits from it (C4's
        // last-writer-wins contract).
        if !from_cache {
            cache_put(c, &job.user_id, &url_hash, &page_data).await;
        }
        return;
    }

    let _ = c
        .store
        .insert_chunk(PageContentChunk::new(
            page.id.clone(),
            page_data.content_markdown.clone(),
            ExtractionMetadata {
                method: if from_cache { "cache" } else { "extract" }.to_string(),
                quality_score: page_data.quality_score,
            },
        ))
        .await;

    if !from_cache {
        cache_put(c, &job.user_id, &url_hash, &page_data).await;
    }

    let processed_delta = if counts_as_processed { 1 } else { 0 };
    let _ = c
        .store
        .increment_progress(job_id, processed_delta, 0, 0, page_data.word_count as u64)
        .await;

    c.events
        .append(
            job_id,
            &job.user_id,
            EventPayload::UrlCrawled {
                url: url.to_string(),
                success: true,
                http_status,
                content_length: Some(page_data.content_markdown.len()),
                quality_score: Some(page_data.quality_score),
                from_cache,
            },
        )
        .await;

    if task.depth < job.config.max_depth {
        admit_links(c, job_id, &job.user_id, seed, &job.config, task.depth, &page_data.outbound_links)
            .await;
    }
}

async fn cache_put(c: &Collaborators, user_id: &str, url_hash: &str, page_data: &ExtractedPage) {
    c.cache
        .put(
            user_id,
            url_hash,
            UrlCacheEntry {
                title: page_data.title.clone(),
                content: page_data.content_markdown.clone(),
                links: page_data.outbound_links.clone(),
                quality_score: page_data.quality_score,
                word_count: page_data.word_count,
                cached_at: Utc::now(),
                ttl_secs: c.config.cache_ttl_secs,
            },
        )
        .await;
}

#[allow(clippy::too_many_arguments)]
async fn record_failed_page(
    c: &Collaborators,
    job_id: &str,
    user_id: &str,
    url: &Url,
    url_hash: &str,
    depth: u32,
    http_status: Option<u16>,
    error_message: Option<String>,
) {
    let page = CrawledPage {
        id: Uuid::new_v4().to_string(),
        job_id: job_id.to_string(),
        url: url.to_string(),
        url_hash: url_hash.to_string(),
        title: None,
        depth,
        http_status,
        status: PageStatus::Error,
        error_message: error_message.clone(),
        quality_score: 0,
        word_count: 0,
        crawled_at: Utc::now(),
    };

    if c.store.insert_page(page).await.unwrap_or(false) {
        let _ = c.store.increment_progress(job_id, 0, 0, 1, 0).await;
        c.events
            .append(
                job_id,
                user_id,
                EventPayload::UrlCrawled {
                    url: url.to_string(),
                    success: false,
                    http_status,
                    content_length: None,
                    quality_score: None,
                    from_cache: false,
                },
            )
            .await;
    }
}

/// Admission gauntlet for links discovered mid-crawl: resolve
/// against the seed with external origins disallowed, then scope/doc-like/
/// depth/budget checks, then the atomic enqueue itself.
async fn admit_links(
    c: &Collaborators,
    job_id: &str,
    user_id: &str,
    seed: &Url,
    config: &CrawlConfig,
    current_depth: u32,
    links: &[String],
) {
    let current_discovered = c
        .store
        .get_job(job_id)
        .await
        .ok()
        .flatten()
        .map(|j| j.progress_summary.discovered)
        .unwrap_or(0);

    let mut admitted_here: u32 = 0;
    for link in links {
        if current_discovered + admitted_here >= config.max_pages {
            break;
        }
        let Some(normalized) = normalize::normalize(link, seed, false, false) else {
            continue;
        };
        if !normalize::within_path_prefix(&normalized, seed) {
            continue;
        }
        if !normalize::is_documentation_like(&normalized) {
            continue;
        }
        if c.queue.enqueue(job_id, normalized.as_str(), current_depth + 1).await {
            admitted_here += 1;
        }
    }

    if admitted_here > 0 {
        let _ = c
            .store
            .increment_progress(job_id, 0, admitted_here, 0, 0)
            .await;
        let total = c
            .store
            .get_job(job_id)
            .await
            .ok()
            .flatten()
            .map(|j| j.progress_summary.discovered)
            .unwrap_or(current_discovered + admitted_here);
        c.events
            .append(
                job_id,
                user_id,
                EventPayload::UrlsDiscovered {
                    count: admitted_here,
                    depth: current_depth + 1,
                    total_discovered: total,
                },
            )
            .await;
    }
}

/// Finalize a job once the queue has drained: recompute totals, build the
/// combined Markdown artifact, and transition to the terminal status.
async fn finalize_job(c: &Collaborators, job_id: &str) {
    let Ok(Some(job)) = c.store.get_job(job_id).await else {
        return;
    };
    if job.status.is_terminal() {
        return;
    }

    let mut pages = c.store.list_pages(job_id).await.unwrap_or_default();
    pages.retain(|p| p.status == PageStatus::Crawled);
    pages.sort_by_key(|p| p.crawled_at);

    let total_processed = job.progress_summary.processed;
    let total_discovered = job.progress_summary.discovered;
    let total_words = job.progress_summary.total_words;

    if pages.is_empty() {
        let message = "No URLs were successfully crawled".to_string();
        let message_for_job = message.clone();
        let _ = c
            .store
            .update_job(
                job_id,
                Box::new(move |j| {
                    j.status = JobStatus::Failed;
                    j.error_message = Some(message_for_job);
                    j.status_message = Some("failed".to_string());
                }),
            )
            .await;
        c.events
            .append(
                job_id,
                &job.user_id,
                EventPayload::JobFailed {
                    error: message,
                    total_processed,
                    total_discovered,
                },
            )
            .await;
        c.queue.clear(job_id).await;
        schedule_event_eviction(c, job_id);
        return;
    }

    let mut sections = Vec::with_capacity(pages.len());
    for page in &pages {
        let body = c
            .store
            .get_chunk(&page.id)
            .await
            .ok()
            .flatten()
            .map(|chunk| chunk.content)
            .unwrap_or_default();
        let heading = page.title.clone().unwrap_or_else(|| page.url.clone());
        sections.push(format!("# {heading}\n\n{body}"));
    }
    let combined = sections.join("\n\n---\n\n");
    let _ = c.store.save_artifact(job_id, combined).await;

    let _ = c
        .store
        .update_job(
            job_id,
            Box::new(|j| {
                j.status = JobStatus::Completed;
                j.status_message = Some("completed".to_string());
            }),
        )
        .await;
    c.events
        .append(
            job_id,
            &job.user_id,
            EventPayload::JobCompleted {
                total_processed,
                total_discovered,
                total_words,
            },
        )
        .await;
    c.queue.clear(job_id).await;
    schedule_event_eviction(c, job_id);
}

/// Spawn a background task that evicts `job_id`'s event log once it has been
/// terminal for at least `config.event_retention_secs` — long enough for a
/// disconnected subscriber to reconnect with `Last-Event-ID` and replay.
fn schedule_event_eviction(c: &Collaborators, job_id: &str) {
    let events = c.events.clone();
    let job_id = job_id.to_string();
    let retention = Duration::from_secs(c.config.event_retention_secs.max(0) as u64);
    tokio::spawn(async move {
        tokio::time::sleep(retention).await;
        events.evict(&job_id).await;
    });
}

async fn timeout_job(c: &Collaborators, job_id: &str) {
    let Ok(Some(job)) = c.store.get_job(job_id).await else {
        return;
    };
    if job.status.is_terminal() {
        return;
    }

    let _ = c
        .store
        .update_job(
            job_id,
            Box::new(|j| {
                j.status = JobStatus::Failed;
                j.error_message = Some("timeout".to_string());
                j.status_message = Some("failed".to_string());
            }),
        )
        .await;
    c.events
        .append(
            job_id,
            &job.user_id,
            EventPayload::JobFailed {
                error: "timeout".to_string(),
                total_processed: job.progress_summary.processed,
                total_discovered: job.progress_summary.discovered,
            },
        )
        .await;
    c.queue.clear(job_id).await;
    schedule_event_eviction(c, job_id);
}

async fn fail_job(c: &Collaborators, job_id: &str, user_id: &str, reason: &str) {
    let _ = c
        .store
        .update_job(
            job_id,
            Box::new({
                let reason = reason.to_string();
                move |j| {
                    j.status = JobStatus::Failed;
                    j.error_message = Some(reason);
                    j.status_message = Some("failed".to_string());
                }
            }),
        )
        .await;
    c.events
        .append(
            job_id,
            user_id,
            EventPayload::JobFailed {
                error: reason.to_string(),
                total_processed: 0,
                total_discovered: 0,
            },
        )
        .await;
    schedule_event_eviction(c, job_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            port: 0,
            shared_secret: "test".to_string(),
            user_agent: "docrawl-test/0.1".to_string(),
            fetch_rate_per_second: 4,
            fetch_timeout_ms: 200,
            job_timeout_ms: 60_000,
            max_workers_per_job: 2,
            batch_size: 5,
            max_global_workers: 4,
            cache_ttl_secs: 3600,
            sitemap_origin_cache_ttl_secs: 60,
            event_retention_secs: 3600,
            heartbeat_interval_secs: 15,
            finalize_quiescence_ms: 50,
        })
    }

    #[tokio::test]
    async fn submit_rejects_non_http_scheme() {
        let manager = JobManager::new(test_config());
        let req = SubmitCrawlRequest {
            url: "ftp://example.com/docs".to_string(),
            config: None,
        };
        let err = manager.submit("user-1", req).await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn submit_rejects_zero_max_pages() {
        let manager = JobManager::new(test_config());
        let req = SubmitCrawlRequest {
            url: "https://docs.example.com/guide".to_string(),
            config: Some(CrawlConfig {
                max_pages: 0,
                ..CrawlConfig::default()
            }),
        };
        let err = manager.submit("user-1", req).await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn submit_creates_pending_job_immediately() {
        let manager = JobManager::new(test_config());
        let req = SubmitCrawlRequest {
            url: "https://docs.example.com/guide".to_string(),
            config: Some(CrawlConfig {
                max_pages: 1,
                max_depth: 0,
                ..CrawlConfig::default()
            }),
        };
        let job = manager.submit("user-1", req).await.unwrap();
        assert_eq!(job.seed_url, "https://docs.example.com/guide");
        assert_eq!(job.user_id, "user-1");
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_not_found() {
        let manager = JobManager::new(test_config());
        let err = manager.cancel("user-1", "no-such-job").await.unwrap_err();
        assert!(matches!(err, SubmitError::NotFound));
    }

    #[tokio::test]
    async fn job_state_hides_jobs_owned_by_another_user() {
        let manager = JobManager::new(test_config());
        let req = SubmitCrawlRequest {
            url: "https://docs.example.com/guide".to_string(),
            config: Some(CrawlConfig {
                max_pages: 1,
                max_depth: 0,
                ..CrawlConfig::default()
            }),
        };
        let job = manager.submit("user-1", req).await.unwrap();
        let err = manager.job_state("someone-else", &job.id).await.unwrap_err();
        assert!(matches!(err, SubmitError::NotFound));
    }

    fn test_collaborators(config: Arc<Config>) -> Collaborators {
        Collaborators {
            store: Arc::new(InMemoryJobStore::new()),
            queue: Arc::new(InMemoryWorkQueue::new()),
            cache: Arc::new(InMemoryContentCache::new()),
            events: Arc::new(InMemoryEventLog::new()),
            engine: Arc::new(CrawlEngine::new(RateLimitedFetcher::new(4, 100, "test"))),
            sitemap: Arc::new(SitemapResolver::new(Duration::from_secs(60))),
            global_workers: Arc::new(Semaphore::new(4)),
            config,
        }
    }

    #[tokio::test]
    async fn process_task_skips_tasks_beyond_max_depth() {
        let collaborators = test_collaborators(test_config());

        let mut job = Job::new(
            "job-1".to_string(),
            "user-1".to_string(),
            "https://docs.example.com/guide".to_string(),
            CrawlConfig {
                max_pages: 5,
                max_depth: 0,
                ..CrawlConfig::default()
            },
        );
        job.status = JobStatus::Processing;
        collaborators.store.create_job(job).await.unwrap();

        let seed = Url::parse("https://docs.example.com/guide").unwrap();
        let task = QueueTask {
            job_id: "job-1".to_string(),
            url: "https://docs.example.com/guide/extra".to_string(),
            depth: 1,
            enqueued_at: Utc::now(),
        };

        process_task(&collaborators, "job-1", &seed, task).await;

        let pages = collaborators.store.list_pages("job-1").await.unwrap();
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn finalize_with_no_successful_pages_fails_the_job() {
        let collaborators = test_collaborators(test_config());

        let job = Job::new(
            "job-1".to_string(),
            "user-1".to_string(),
            "https://docs.example.com/guide".to_string(),
            CrawlConfig::default(),
        );
        collaborators.store.create_job(job).await.unwrap();
        collaborators
            .store
            .update_job("job-1", Box::new(|j| j.status = JobStatus::Processing))
            .await
            .unwrap();

        finalize_job(&collaborators, "job-1").await;

        let job = collaborators.store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("No URLs were successfully crawled")
        );
    }

    #[tokio::test]
    async fn finalize_combines_pages_in_crawled_at_order() {
        let collaborators = test_collaborators(test_config());

        let job = Job::new(
            "job-1".to_string(),
            "user-1".to_string(),
            "https://docs.example.com/guide".to_string(),
            CrawlConfig::default(),
        );
        collaborators.store.create_job(job).await.unwrap();
        collaborators
            .store
            .update_job("job-1", Box::new(|j| j.status = JobStatus::Processing))
            .await
            .unwrap();

        for (i, (title, body)) in [("First", "one"), ("Second", "two")].into_iter().enumerate() {
            let page = CrawledPage {
                id: format!("p{i}"),
                job_id: "job-1".to_string(),
                url: format!("https://docs.example.com/guide/{i}"),
                url_hash: format!("hash{i}"),
                title: Some(title.to_string()),
                depth: 0,
                http_status: Some(200),
                status: PageStatus::Crawled,
                error_message: None,
                quality_score: 80,
                word_count: 10,
                crawled_at: Utc::now() + chrono::Duration::seconds(i as i64),
            };
            collaborators.store.insert_page(page.clone()).await.unwrap();
            collaborators
                .store
                .insert_chunk(PageContentChunk::new(
                    page.id,
                    body.to_string(),
                    ExtractionMetadata {
                        method: "extract".to_string(),
                        quality_score: 80,
                    },
                ))
                .await
                .unwrap();
        }
        collaborators
            .store
            .increment_progress("job-1", 2, 2, 0, 20)
            .await
            .unwrap();

        finalize_job(&collaborators, "job-1").await;

        let job = collaborators.store.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let artifact = collaborators.store.get_artifact("job-1").await.unwrap().unwrap();
        assert_eq!(artifact, "# First\n\none\n\n---\n\n# Second\n\ntwo");
    }
}
