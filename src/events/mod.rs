//! Per-job append-only progress event log with monotonic ids.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::models::{EventLogEntry, EventPayload};

const BROADCAST_CAPACITY: usize = 1024;

/// Append-only, per-job ordered log of typed progress events.
///
/// `append` assigns the event id and must return only once the event is
/// durably visible to subsequent `read_since` calls — a subscriber resuming
/// by id must never observe a gap.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, job_id: &str, user_id: &str, payload: EventPayload) -> u64;

    /// All events with `event_id > last_event_id` (or all events, if `None`),
    /// in append order.
    async fn read_since(&self, job_id: &str, last_event_id: Option<u64>) -> Vec<EventLogEntry>;

    /// A live channel of events appended to `job_id` from this point on, for
    /// the subscription bridge to tail alongside an initial `read_since`
    /// catch-up read.
    async fn subscribe(&self, job_id: &str) -> broadcast::Receiver<EventLogEntry>;

    /// Drop a job's log entirely. Called once a job has been terminal for at
    /// least the configured event retention window — not before, since a
    /// reconnecting subscriber within that window must still be able to replay.
    async fn evict(&self, job_id: &str);
}

struct JobLog {
    entries: Vec<EventLogEntry>,
    next_id: u64,
    sender: broadcast::Sender<EventLogEntry>,
}

impl Default for JobLog {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        JobLog {
            entries: Vec::new(),
            next_id: 1,
            sender,
        }
    }
}

/// Default `EventLog` collaborator: an in-process append-only vector per
/// job, paired with a broadcast channel so the subscription bridge can
/// tail new events without polling.
pub struct InMemoryEventLog {
    jobs: Arc<RwLock<HashMap<String, JobLog>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        InMemoryEventLog {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, job_id: &str, user_id: &str, payload: EventPayload) -> u64 {
        let mut jobs = self.jobs.write().await;
        let log = jobs.entry(job_id.to_string()).or_default();

        let event_id = log.next_id;
        log.next_id += 1;

        let entry = EventLogEntry {
            event_id,
            job_id: job_id.to_string(),
            user_id: user_id.to_string(),
            payload,
            created_at: Utc::now(),
        };

        log.entries.push(entry.clone());
        // A subscription bridge may not be listening yet (or may have
        // dropped); catch-up is always available via `read_since`.
        let _ = log.sender.send(entry);

        event_id
    }

    async fn read_since(&self, job_id: &str, last_event_id: Option<u64>) -> Vec<EventLogEntry> {
        let jobs = self.jobs.read().await;
        let Some(log) = jobs.get(job_id) else {
            return Vec::new();
        };

        match last_event_id {
            Some(last) => log
                .entries
                .iter()
                .filter(|e| e.event_id > last)
                .cloned()
                .collect(),
            None => log.entries.clone(),
        }
    }

    async fn subscribe(&self, job_id: &str) -> broadcast::Receiver<EventLogEntry> {
        let mut jobs = self.jobs.write().await;
        jobs.entry(job_id.to_string()).or_default().sender.subscribe()
    }

    async fn evict(&self, job_id: &str) {
        self.jobs.write().await.remove(job_id);
    }
}
