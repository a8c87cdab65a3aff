//! FIFO work queue with an atomic per-job dedup set.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

use crate::models::QueueTask;
use crate::normalize;

/// FIFO task queue plus a per-job "seen fingerprints" set. `enqueue` is the
/// sole admission path and is the atomicity boundary: a URL is either added
/// to the seen-set *and* pushed onto the FIFO, or neither happens.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Atomically add `url`'s fingerprint to the job's seen-set; if already
    /// present, return `false` without pushing. Otherwise push `{job_id,
    /// url, depth}` onto the job's FIFO and return `true`.
    async fn enqueue(&self, job_id: &str, url: &str, depth: u32) -> bool;

    /// Pop up to `max_n` tasks for `job_id`, FIFO order.
    async fn dequeue(&self, job_id: &str, max_n: usize) -> Vec<QueueTask>;

    async fn queue_depth(&self, job_id: &str) -> usize;

    async fn seen_size(&self, job_id: &str) -> usize;

    /// Mark `count` tasks as picked up for processing (in flight).
    async fn mark_in_flight(&self, job_id: &str, count: u32);

    /// Release `count` in-flight slots once their tasks have been fully
    /// processed (persisted, events emitted, links admitted).
    async fn release_in_flight(&self, job_id: &str, count: u32);

    async fn in_flight(&self, job_id: &str) -> u32;

    /// Drop all queue/seen-set state for a job (called on finalize).
    async fn clear(&self, job_id: &str);
}

#[derive(Default)]
struct JobQueueState {
    tasks: VecDeque<QueueTask>,
    seen: HashSet<String>,
    in_flight: u32,
}

/// Default `WorkQueue` collaborator backed by in-process state. A real
/// deployment would swap this for a message queue plus a shared dedup set
/// (e.g. Redis `SADD`), as long as it preserves the add-if-absent atomicity
/// this trait requires.
pub struct InMemoryWorkQueue {
    jobs: Arc<RwLock<std::collections::HashMap<String, JobQueueState>>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        InMemoryWorkQueue {
            jobs: Arc::new(RwLock::new(std::collections::HashMap::new())),
        }
    }
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, job_id: &str, url: &str, depth: u32) -> bool {
        let fingerprint = match Url::parse(url) {
            Ok(parsed) => normalize::fingerprint(&parsed, false),
            Err(_) => return false,
        };

        let mut jobs = self.jobs.write().await;
        let state = jobs.entry(job_id.to_string()).or_default();

        if !state.seen.insert(fingerprint) {
            return false;
        }

        state.tasks.push_back(QueueTask {
            job_id: job_id.to_string(),
            url: url.to_string(),
            depth,
            enqueued_at: Utc::now(),
        });
        true
    }

    async fn dequeue(&self, job_id: &str, max_n: usize) -> Vec<QueueTask> {
        let mut jobs = self.jobs.write().await;
        let Some(state) = jobs.get_mut(job_id) else {
            return Vec::new();
        };

        let mut popped = Vec::with_capacity(max_n.min(state.tasks.len()));
        for _ in 0..max_n {
            match state.tasks.pop_front() {
                Some(task) => popped.push(task),
                None => break,
            }
        }
        popped
    }

    async fn queue_depth(&self, job_id: &str) -> usize {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|s| s.tasks.len())
            .unwrap_or(0)
    }

    async fn seen_size(&self, job_id: &str) -> usize {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|s| s.seen.len())
            .unwrap_or(0)
    }

    async fn mark_in_flight(&self, job_id: &str, count: u32) {
        let mut jobs = self.jobs.write().await;
        jobs.entry(job_id.to_string()).or_default().in_flight += count;
    }

    async fn release_in_flight(&self, job_id: &str, count: u32) {
        let mut jobs = self.jobs.write().await;
        if let Some(state) = jobs.get_mut(job_id) {
            state.in_flight = state.in_flight.saturating_sub(count);
        }
    }

    async fn in_flight(&self, job_id: &str) -> u32 {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|s| s.in_flight)
            .unwrap_or(0)
    }

    async fn clear(&self, job_id: &str) {
        self.jobs.write().await.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_rejects_duplicate_fingerprint() {
        let queue = InMemoryWorkQueue::new();
        assert!(
            queue
                .enqueue("job-1", "https://docs.example.com/guide/a", 1)
                .await
        );
        assert!(
            !queue
                .enqueue("job-1", "https://docs.example.com/guide/a", 1)
                .await
        );
        assert_eq!(queue.queue_depth("job-1").await, 1);
        assert_eq!(queue.seen_size("job-1").await, 1);
    }

    #[tokio::test]
    async fn dequeue_is_fifo_and_bounded() {
        let queue = InMemoryWorkQueue::new();
        for path in ["a", "b", "c"] {
            queue
                .enqueue("job-1", &format!("https://docs.example.com/guide/{path}"), 1)
                .await;
        }

        let first = queue.dequeue("job-1", 2).await;
        assert_eq!(first.len(), 2);
        assert!(first[0].url.ends_with("/a"));
        assert!(first[1].url.ends_with("/b"));

        let rest = queue.dequeue("job-1", 5).await;
        assert_eq!(rest.len(), 1);
        assert!(rest[0].url.ends_with("/c"));
    }

    #[tokio::test]
    async fn concurrent_enqueue_race_admits_exactly_once() {
        let queue = Arc::new(InMemoryWorkQueue::new());
        let url = "https://docs.example.com/guide/race";

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.enqueue("job-1", url, 1).await
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(queue.queue_depth("job-1").await, 1);
    }

    #[tokio::test]
    async fn in_flight_counter_tracks_mark_and_release() {
        let queue = InMemoryWorkQueue::new();
        queue.mark_in_flight("job-1", 3).await;
        assert_eq!(queue.in_flight("job-1").await, 3);
        queue.release_in_flight("job-1", 1).await;
        assert_eq!(queue.in_flight("job-1").await, 2);
    }
}
