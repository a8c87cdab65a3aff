use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

/// Per-job crawl configuration, supplied at submit time.
///
/// Callers may omit any field and get a conservative, bounded crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: u32,
    #[serde(default = "default_true")]
    pub respect_robots: bool,
    #[serde(default = "default_true")]
    pub follow_sitemaps: bool,
    #[serde(default)]
    pub force_refresh: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            quality_threshold: default_quality_threshold(),
            respect_robots: true,
            follow_sitemaps: true,
            force_refresh: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_pages() -> u32 {
    50
}

fn default_max_depth() -> u32 {
    2
}

fn default_quality_threshold() -> u32 {
    20
}

/// Submit-crawl request body.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitCrawlRequest {
    pub url: String,
    #[serde(default)]
    pub config: Option<CrawlConfig>,
}

/// Job lifecycle status. Transitions are monotone along a DAG:
/// pending -> processing -> {completed | failed | cancelled}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Cumulative progress counters for a job, refreshed on every worker write.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub processed: u32,
    pub discovered: u32,
    pub failed: u32,
    pub total_words: u64,
}

/// A single crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub seed_url: String,
    pub config: CrawlConfig,
    pub status: JobStatus,
    pub status_message: Option<String>,
    pub state_version: u64,
    pub progress_summary: ProgressSummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(id: String, user_id: String, seed_url: String, config: CrawlConfig) -> Self {
        let now = Utc::now();
        Job {
            id,
            user_id,
            seed_url,
            config,
            status: JobStatus::Pending,
            status_message: None,
            state_version: 0,
            progress_summary: ProgressSummary::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
        }
    }
}

/// Status of an individual crawled page, distinct from the job's own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Crawled,
    Error,
    Skipped,
}

/// One fetched URL belonging to one job. Immutable once created; uniqueness
/// on `(job_id, url_hash)` is the serialization point for at-most-once
/// storage under concurrent workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledPage {
    pub id: String,
    pub job_id: String,
    pub url: String,
    pub url_hash: String,
    pub title: Option<String>,
    pub depth: u32,
    pub http_status: Option<u16>,
    pub status: PageStatus,
    pub error_message: Option<String>,
    pub quality_score: u8,
    pub word_count: u32,
    pub crawled_at: DateTime<Utc>,
}

/// Extraction metadata attached to a content chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub method: String,
    pub quality_score: u8,
}

/// One content blob per page. The schema allows future multi-chunk pages;
/// this core always writes a single chunk at index 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContentChunk {
    pub page_id: String,
    pub content: String,
    pub content_type: String,
    pub chunk_index: u32,
    pub metadata: ExtractionMetadata,
}

impl PageContentChunk {
    pub fn new(page_id: String, content: String, metadata: ExtractionMetadata) -> Self {
        PageContentChunk {
            page_id,
            content,
            content_type: "markdown".to_string(),
            chunk_index: 0,
            metadata,
        }
    }
}

/// Cross-job, per-user content cache entry, keyed externally by
/// `(user_id, url_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCacheEntry {
    pub title: Option<String>,
    pub content: String,
    pub links: Vec<String>,
    pub quality_score: u8,
    pub word_count: u32,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl UrlCacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.cached_at).num_seconds() > self.ttl_secs
    }
}

/// `{job_id, url, depth, enqueued_at}` — FIFO ordering within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTask {
    pub job_id: String,
    pub url: String,
    pub depth: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Typed event payloads, one variant per event type in the progress catalog.
/// Modeled as a sum type rather than a free-form map so every producer and
/// consumer agrees on shape.
#[derive(Debug, Clone)]
pub enum EventPayload {
    StreamConnected {
        job_id: String,
    },
    DiscoveryStarted {
        job_id: String,
    },
    UrlsDiscovered {
        count: u32,
        depth: u32,
        total_discovered: u32,
    },
    UrlCrawled {
        url: String,
        success: bool,
        http_status: Option<u16>,
        content_length: Option<usize>,
        quality_score: Option<u8>,
        from_cache: bool,
    },
    BatchProgress {
        urls: Vec<String>,
    },
    Progress {
        processed: u32,
        total: u32,
    },
    BatchError {
        error: String,
        count: u32,
    },
    JobFailed {
        error: String,
        total_processed: u32,
        total_discovered: u32,
    },
    JobCompleted {
        total_processed: u32,
        total_discovered: u32,
        total_words: u64,
    },
}

impl EventPayload {
    /// The wire `type` string for this event, as enumerated in the
    /// progress event catalog.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::StreamConnected { .. } => "stream_connected",
            EventPayload::DiscoveryStarted { .. } => "discovery_started",
            EventPayload::UrlsDiscovered { .. } => "urls_discovered",
            EventPayload::UrlCrawled { .. } => "url_crawled",
            EventPayload::BatchProgress { .. } => "batch_progress",
            EventPayload::Progress { .. } => "progress",
            EventPayload::BatchError { .. } => "batch_error",
            EventPayload::JobFailed { .. } => "job_failed",
            EventPayload::JobCompleted { .. } => "job_completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::JobFailed { .. } | EventPayload::JobCompleted { .. }
        )
    }

    /// JSON body for the SSE `data:` line — just the payload fields, no
    /// envelope.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            EventPayload::StreamConnected { job_id } => serde_json::json!({ "job_id": job_id }),
            EventPayload::DiscoveryStarted { job_id } => serde_json::json!({ "job_id": job_id }),
            EventPayload::UrlsDiscovered {
                count,
                depth,
                total_discovered,
            } => serde_json::json!({
                "count": count,
                "depth": depth,
                "total_discovered": total_discovered,
            }),
            EventPayload::UrlCrawled {
                url,
                success,
                http_status,
                content_length,
                quality_score,
                from_cache,
            } => serde_json::json!({
                "url": url,
                "success": success,
                "http_status": http_status,
                "content_length": content_length,
                "quality_score": quality_score,
                "from_cache": from_cache,
            }),
            EventPayload::BatchProgress { urls } => serde_json::json!({ "urls": urls }),
            EventPayload::Progress { processed, total } => serde_json::json!({
                "processed": processed,
                "total": total,
            }),
            EventPayload::BatchError { error, count } => serde_json::json!({
                "error": error,
                "count": count,
            }),
            EventPayload::JobFailed {
                error,
                total_processed,
                total_discovered,
            } => serde_json::json!({
                "error": error,
                "totalProcessed": total_processed,
                "totalDiscovered": total_discovered,
            }),
            EventPayload::JobCompleted {
                total_processed,
                total_discovered,
                total_words,
            } => serde_json::json!({
                "totalProcessed": total_processed,
                "totalDiscovered": total_discovered,
                "totalWords": total_words,
            }),
        }
    }
}

/// `{event_id, job_id, user_id, type, payload, created_at}` — append-only,
/// totally ordered per job by `event_id`.
#[derive(Debug, Clone)]
pub struct EventLogEntry {
    pub event_id: u64,
    pub job_id: String,
    pub user_id: String,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

/// `{up to 10 latest events, oldest first}` summary used by the job-state
/// handler.
#[derive(Debug, Clone, Serialize)]
pub struct RecentActivityItem {
    pub event_id: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl From<&EventLogEntry> for RecentActivityItem {
    fn from(e: &EventLogEntry) -> Self {
        RecentActivityItem {
            event_id: e.event_id,
            event_type: e.payload.kind().to_string(),
            payload: e.payload.to_json(),
        }
    }
}

/// `GET /api/v1/crawl/:job_id` response shape.
#[derive(Debug, Clone, Serialize)]
pub struct JobStateResponse {
    pub success: bool,
    pub status: JobStatus,
    pub total_processed: u32,
    pub total_discovered: u32,
    pub recent_activity: Vec<RecentActivityItem>,
    pub last_event_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single active-job entry as returned by the list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveJobEntry {
    pub job_id: String,
    pub seed_url: String,
    pub status: JobStatus,
    pub statistics: JobStateResponse,
}

/// Outcome of extracting one fetched HTML page.
#[derive(Debug, Clone)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub content_markdown: String,
    pub outbound_links: Vec<String>,
    pub quality_score: u8,
    pub word_count: u32,
}
