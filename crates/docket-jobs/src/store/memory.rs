//! Process-local job store.

use super::JobStore;
use crate::error::JobResult;
use crate::job::{JobId, JobRecord, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Job store backed by a mutex-guarded map.
///
/// Claims and reclaims run under a single lock acquisition, so they are
/// atomic with respect to every worker sharing this instance. Nothing is
/// shared across processes.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Returns true if no jobs are stored.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Snapshot of every job with the given status.
    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<JobRecord> {
        self.jobs
            .lock()
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &JobRecord) -> JobResult<JobId> {
        self.jobs.lock().insert(job.id.clone(), job.clone());
        Ok(job.id.clone())
    }

    async fn claim_next_due(&self, now: DateTime<Utc>) -> JobResult<Option<JobRecord>> {
        let mut jobs = self.jobs.lock();

        let Some(job) = jobs
            .values_mut()
            .filter(|job| job.is_due(now))
            .min_by_key(|job| job.scheduled_at)
        else {
            return Ok(None);
        };

        job.claim(now);
        Ok(Some(job.clone()))
    }

    async fn save(&self, job: &JobRecord) -> JobResult<()> {
        self.jobs.lock().insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let mut jobs = self.jobs.lock();
        let mut reclaimed = 0u64;

        for job in jobs.values_mut().filter(|job| job.is_stale(cutoff)) {
            job.reclaim();
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    async fn get(&self, id: &JobId) -> JobResult<Option<JobRecord>> {
        Ok(self.jobs.lock().get(id).cloned())
    }

    async fn health_check(&self) -> JobResult<()> {
        Ok(())
    }
}
