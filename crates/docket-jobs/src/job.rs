//! Job document and its lifecycle transitions.

use crate::retry::RetryPolicy;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new time-ordered job ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job status enumeration.
///
/// Persisted as the variant name (`"Pending"`, `"Processing"`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting to be claimed once `scheduled_at` has passed.
    #[default]
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Retries exhausted.
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Name as stored in the document.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Processing => "Processing",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted job document.
///
/// Unknown fields are ignored on read so documents written by newer
/// versions stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Document identifier.
    pub id: JobId,

    /// Key into the executor registry.
    pub job_type: String,

    /// Opaque executor-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    /// Current status.
    pub status: JobStatus,

    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,

    /// Earliest time the job may be claimed.
    pub scheduled_at: DateTime<Utc>,

    /// Set only while the job is claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,

    /// When the job completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// When the job was marked failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    /// Number of failed execution attempts.
    #[serde(default)]
    pub retry_count: u32,

    /// Error from the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending, eligible again at `at`.
    Retry {
        /// New `scheduled_at`.
        at: DateTime<Utc>,
    },
    /// Retry budget exhausted.
    Failed,
}

impl JobRecord {
    /// A new pending job, due immediately.
    pub fn pending(job_type: impl Into<String>, payload: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            created_at: now,
            scheduled_at: now,
            processing_started_at: None,
            completed_at: None,
            failed_at: None,
            retry_count: 0,
            error_message: None,
        }
    }

    /// Pending and `scheduled_at <= now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now
    }

    /// Processing since strictly before `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.processing_started_at.is_some_and(|started| started < cutoff)
    }

    /// Completed or failed.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending → Processing.
    pub fn claim(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.processing_started_at = Some(now);
    }

    /// Processing → Completed.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.processing_started_at = None;
    }

    /// Records one failed attempt and moves the job to its next state.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> FailureOutcome {
        self.retry_count = self.retry_count.saturating_add(1);
        self.error_message = Some(error.into());
        self.processing_started_at = None;

        if policy.is_exhausted(self.retry_count) {
            self.status = JobStatus::Failed;
            self.failed_at = Some(now);
            return FailureOutcome::Failed;
        }

        let delay = ChronoDuration::from_std(policy.delay_for(self.retry_count))
            .unwrap_or_else(|_| ChronoDuration::days(36_500));
        let at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.status = JobStatus::Pending;
        self.scheduled_at = at;
        FailureOutcome::Retry { at }
    }

    /// Records one failed attempt and marks the job failed regardless of the
    /// remaining retry budget.
    pub fn fail_permanently(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.error_message = Some(error.into());
        self.processing_started_at = None;
        self.status = JobStatus::Failed;
        self.failed_at = Some(now);
    }

    /// Abandoned claim → Pending. Leaves `retry_count` alone.
    pub fn reclaim(&mut self) {
        self.status = JobStatus::Pending;
        self.processing_started_at = None;
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
