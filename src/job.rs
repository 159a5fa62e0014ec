//! Stream job tracking.
//!
//! Every ingestion request is keyed by a caller-supplied deterministic
//! stream id. The registry records each job's lifecycle state and byte
//! progress, and is consulted by the eviction sweep so an in-flight
//! job's directory is never deleted out from under it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle state of a stream job.
///
/// `Ready` and `Failed` are terminal; the job's on-disk footprint
/// survives until the eviction sweep removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Downloading,
    Inspecting,
    Packaging,
    Ready,
    Failed(String),
}

impl JobState {
    /// A job in a non-terminal state holds its directory against eviction.
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, JobState::Ready | JobState::Failed(_))
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Downloading => write!(f, "downloading"),
            JobState::Inspecting => write!(f, "inspecting"),
            JobState::Packaging => write!(f, "packaging"),
            JobState::Ready => write!(f, "ready"),
            JobState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// One ingestion job, from first request to eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamJob {
    /// Caller-supplied deterministic id (content type + id + variant).
    pub stream_id: String,
    /// Remote source being ingested.
    pub source_url: String,
    /// Total size from Content-Length, when the server sent one.
    pub bytes_total: Option<u64>,
    /// Cumulative bytes written to disk.
    pub bytes_downloaded: u64,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe registry of stream jobs.
///
/// Cheap to clone; all clones share the same map. Inject one instance
/// into the coordinator, the pipeline, and the sweep so they agree on
/// which stream ids are in flight.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, StreamJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job in `Queued` state, or return the existing record.
    pub fn register(&self, stream_id: &str, source_url: &str) -> StreamJob {
        let job = self
            .jobs
            .entry(stream_id.to_string())
            .or_insert_with(|| {
                let now = Utc::now();
                tracing::info!(stream_id = %stream_id, url = %source_url, "Registered stream job");
                StreamJob {
                    stream_id: stream_id.to_string(),
                    source_url: source_url.to_string(),
                    bytes_total: None,
                    bytes_downloaded: 0,
                    state: JobState::Queued,
                    created_at: now,
                    updated_at: now,
                }
            })
            .clone();
        job
    }

    /// Move a job to a new state.
    pub fn set_state(&self, stream_id: &str, state: JobState) {
        if let Some(mut job) = self.jobs.get_mut(stream_id) {
            tracing::debug!(
                stream_id = %stream_id,
                from = %job.state,
                to = %state,
                "Job state transition"
            );
            job.state = state;
            job.updated_at = Utc::now();
        }
    }

    /// Record download progress for a job.
    pub fn update_progress(&self, stream_id: &str, downloaded: u64, total: Option<u64>) {
        if let Some(mut job) = self.jobs.get_mut(stream_id) {
            job.bytes_downloaded = downloaded;
            if total.is_some() {
                job.bytes_total = total;
            }
            job.updated_at = Utc::now();
        }
    }

    pub fn get(&self, stream_id: &str) -> Option<StreamJob> {
        self.jobs.get(stream_id).map(|entry| entry.value().clone())
    }

    /// Whether a job currently holds its directory against eviction.
    pub fn is_in_flight(&self, stream_id: &str) -> bool {
        self.jobs
            .get(stream_id)
            .map(|job| job.state.is_in_flight())
            .unwrap_or(false)
    }

    /// Drop a job record entirely (after its storage is removed).
    pub fn remove(&self, stream_id: &str) -> Option<StreamJob> {
        self.jobs.remove(stream_id).map(|(_, job)| job)
    }

    pub fn list(&self) -> Vec<StreamJob> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let registry = JobRegistry::new();
        let first = registry.register("abc123", "https://host/f.mp4");
        registry.set_state("abc123", JobState::Downloading);
        let second = registry.register("abc123", "https://host/f.mp4");

        assert_eq!(registry.len(), 1);
        assert_eq!(first.state, JobState::Queued);
        // Second call returns the live record, not a fresh one.
        assert_eq!(second.state, JobState::Downloading);
    }

    #[test]
    fn test_state_transitions_update_timestamp() {
        let registry = JobRegistry::new();
        let job = registry.register("abc123", "https://host/f.mp4");

        std::thread::sleep(std::time::Duration::from_millis(10));
        registry.set_state("abc123", JobState::Downloading);

        let updated = registry.get("abc123").unwrap();
        assert_eq!(updated.state, JobState::Downloading);
        assert!(updated.updated_at > job.updated_at);
    }

    #[test]
    fn test_in_flight_tracking() {
        let registry = JobRegistry::new();
        registry.register("abc123", "https://host/f.mp4");
        assert!(registry.is_in_flight("abc123"));

        registry.set_state("abc123", JobState::Packaging);
        assert!(registry.is_in_flight("abc123"));

        registry.set_state("abc123", JobState::Ready);
        assert!(!registry.is_in_flight("abc123"));

        registry.set_state("abc123", JobState::Failed("probe failed".to_string()));
        assert!(!registry.is_in_flight("abc123"));

        assert!(!registry.is_in_flight("unknown"));
    }

    #[test]
    fn test_progress_updates() {
        let registry = JobRegistry::new();
        registry.register("abc123", "https://host/f.mp4");
        registry.update_progress("abc123", 1024, Some(10 * 1024 * 1024));

        let job = registry.get("abc123").unwrap();
        assert_eq!(job.bytes_downloaded, 1024);
        assert_eq!(job.bytes_total, Some(10 * 1024 * 1024));

        // Total is sticky once known.
        registry.update_progress("abc123", 2048, None);
        let job = registry.get("abc123").unwrap();
        assert_eq!(job.bytes_downloaded, 2048);
        assert_eq!(job.bytes_total, Some(10 * 1024 * 1024));
    }

    #[test]
    fn test_remove() {
        let registry = JobRegistry::new();
        registry.register("abc123", "https://host/f.mp4");
        assert!(registry.remove("abc123").is_some());
        assert!(registry.is_empty());
        assert!(registry.remove("abc123").is_none());
    }
}
