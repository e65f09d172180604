//! In-memory registry of manually triggered batch runs.
//!
//! Entries are bounded by count and age. On every write and lookup,
//! entries idle longer than the TTL are dropped first, then the least
//! recently updated entries until the registry is within its cap. State
//! is lost on restart; the durable record of a run is its run row.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::ingest::BatchRunResult;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobState {
    Running,
    Done { result: BatchRunResult },
    Failed { error: String },
}

/// Job as reported to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    /// Unix seconds.
    pub created_at: i64,
    #[serde(flatten)]
    pub state: JobState,
}

struct Entry {
    created_at: i64,
    updated: Instant,
    state: JobState,
}

pub struct JobRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    max_entries: usize,
    ttl: Duration,
}

impl JobRegistry {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn from_config(config: &JobsConfig) -> Self {
        Self::new(config.max_entries, Duration::from_secs(config.ttl_secs))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new running job and return its id.
    pub fn start(&self) -> String {
        let job_id = Uuid::new_v4().to_string();
        self.put(&job_id, JobState::Running, Instant::now());
        job_id
    }

    /// Record the final state of a job. A job already evicted stays gone.
    pub fn finish(&self, job_id: &str, state: JobState) {
        self.finish_at(job_id, state, Instant::now());
    }

    pub fn get(&self, job_id: &str) -> Option<JobSnapshot> {
        self.get_at(job_id, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put(&self, job_id: &str, state: JobState, now: Instant) {
        let mut entries = self.lock();
        let created_at = entries
            .get(job_id)
            .map(|e| e.created_at)
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        entries.insert(
            job_id.to_string(),
            Entry {
                created_at,
                updated: now,
                state,
            },
        );
        self.evict(&mut entries, now);
    }

    fn finish_at(&self, job_id: &str, state: JobState, now: Instant) {
        let mut entries = self.lock();
        self.evict(&mut entries, now);
        match entries.get_mut(job_id) {
            Some(entry) => {
                entry.state = state;
                entry.updated = now;
            }
            None => tracing::warn!(job_id, "job_finished_after_eviction"),
        }
    }

    fn get_at(&self, job_id: &str, now: Instant) -> Option<JobSnapshot> {
        let mut entries = self.lock();
        self.evict(&mut entries, now);
        entries.get(job_id).map(|e| JobSnapshot {
            job_id: job_id.to_string(),
            created_at: e.created_at,
            state: e.state.clone(),
        })
    }

    fn evict(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|_, e| now.saturating_duration_since(e.updated) <= self.ttl);

        if entries.len() > self.max_entries {
            let mut by_age: Vec<(Instant, String)> = entries
                .iter()
                .map(|(id, e)| (e.updated, id.clone()))
                .collect();
            by_age.sort();
            let excess = entries.len() - self.max_entries;
            for (_, id) in by_age.into_iter().take(excess) {
                entries.remove(&id);
            }
        }
    }
}
