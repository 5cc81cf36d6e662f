//! Job creation for producers.

use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobRecord};
use crate::metrics::JobMetrics;
use crate::store::JobStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Creates pending jobs. Safe to clone and share between producers.
#[derive(Clone)]
pub struct JobEnqueuer {
    store: Arc<dyn JobStore>,
}

impl JobEnqueuer {
    /// Create an enqueuer writing to `store`.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Serialize `payload` to JSON and enqueue a job due immediately.
    pub async fn enqueue<P: Serialize + ?Sized>(
        &self,
        job_type: &str,
        payload: Option<&P>,
    ) -> JobResult<JobId> {
        let payload = payload.map(serde_json::to_string).transpose()?;
        self.enqueue_raw(job_type, payload).await
    }

    /// Enqueue a job with an already serialized payload.
    pub async fn enqueue_raw(&self, job_type: &str, payload: Option<String>) -> JobResult<JobId> {
        if job_type.trim().is_empty() {
            return Err(JobError::Configuration("job type must not be empty".to_string()));
        }

        let job = JobRecord::pending(job_type, payload, Utc::now());
        let id = self.store.insert(&job).await?;

        JobMetrics::job_enqueued(job_type);
        debug!(job_id = %id, job_type = %job_type, "Job enqueued");

        Ok(id)
    }
}

impl std::fmt::Debug for JobEnqueuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEnqueuer").finish_non_exhaustive()
    }
}
