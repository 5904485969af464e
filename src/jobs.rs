//! In-memory job status registry with write-armed expiry.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::model::JobStatus;

/// Entries are removed this long after their most recent status write.
pub const JOB_TTL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    status: JobStatus,
    generation: u64,
    expiry: JoinHandle<()>,
}

/// Process-local job registry. Reads never extend an entry's lifetime.
#[derive(Clone)]
pub struct JobTracker {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    generation: Arc<AtomicU64>,
    ttl: Duration,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::with_ttl(JOB_TTL)
    }
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            ttl,
        }
    }

    pub fn new_job_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Record `status` and re-arm the expiry timer. Must run inside a tokio runtime.
    pub fn set_status(&self, job_id: &str, status: JobStatus) {
        let entries = Arc::clone(&self.entries);
        let key = job_id.to_string();
        let ttl = self.ttl;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut guard = entries.lock().unwrap_or_else(|p| p.into_inner());
            // A newer write may have replaced the entry while this timer fired.
            if guard.get(&key).is_some_and(|e| e.generation == generation) {
                guard.remove(&key);
                debug!(job_id = %key, "job status expired");
            }
        });
        let entry = Entry {
            status,
            generation,
            expiry,
        };
        if let Some(previous) = guard.insert(job_id.to_string(), entry) {
            previous.expiry.abort();
        }
        debug!(job_id, status = status.as_str(), "job status updated");
    }

    pub fn get_status(&self, job_id: &str) -> Option<JobStatus> {
        let guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard.get(job_id).map(|e| e.status)
    }
}
