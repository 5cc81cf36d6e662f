//! Metrics for job lifecycle monitoring.
//!
//! Recorded through the `metrics` facade; installing an exporter is up to
//! the host process.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job engine.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "docket_jobs_enqueued_total";
    /// Total jobs claimed for processing.
    pub const JOBS_CLAIMED_TOTAL: &str = "docket_jobs_claimed_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "docket_jobs_completed_total";
    /// Total failed attempts rescheduled for retry.
    pub const JOBS_RETRIED_TOTAL: &str = "docket_jobs_retried_total";
    /// Total jobs that exhausted their retries.
    pub const JOBS_FAILED_TOTAL: &str = "docket_jobs_failed_total";
    /// Total stale claims returned to pending.
    pub const JOBS_RECLAIMED_TOTAL: &str = "docket_jobs_reclaimed_total";

    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "docket_job_duration_seconds";

    /// Workers currently holding a claim slot.
    pub const WORKERS_ACTIVE: &str = "docket_workers_active";

    /// Recurring jobs enqueued by the scheduler.
    pub const SCHEDULER_JOBS_TRIGGERED: &str = "docket_scheduler_jobs_triggered_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_CLAIMED_TOTAL,
        "Total number of jobs claimed for processing"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of failed attempts rescheduled for retry"
    );
    describe_counter!(
        names::JOBS_FAILED_TOTAL,
        "Total number of jobs that exhausted their retries"
    );
    describe_counter!(
        names::JOBS_RECLAIMED_TOTAL,
        "Total number of stale claims returned to pending"
    );

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job execution duration in seconds"
    );

    describe_gauge!(names::WORKERS_ACTIVE, "Number of active workers");

    describe_counter!(
        names::SCHEDULER_JOBS_TRIGGERED,
        "Total number of recurring jobs enqueued"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(job_type: &str) {
        counter!(names::JOBS_ENQUEUED_TOTAL, "job_type" => job_type.to_string()).increment(1);
    }

    /// Record a job claimed.
    pub fn job_claimed(job_type: &str) {
        counter!(names::JOBS_CLAIMED_TOTAL, "job_type" => job_type.to_string()).increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(job_type: &str, duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL, "job_type" => job_type.to_string()).increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_type" => job_type.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed attempt that will be retried.
    pub fn job_retried(job_type: &str, attempt: u32, duration: Duration) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "job_type" => job_type.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_type" => job_type.to_string(),
            "status" => "retrying"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job that exhausted its retries.
    pub fn job_failed(job_type: &str, duration: Duration) {
        counter!(names::JOBS_FAILED_TOTAL, "job_type" => job_type.to_string()).increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_type" => job_type.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record stale claims returned to pending.
    pub fn jobs_reclaimed(count: u64) {
        counter!(names::JOBS_RECLAIMED_TOTAL).increment(count);
    }
}

/// Worker metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Update active worker count.
    pub fn update_active(active: usize) {
        gauge!(names::WORKERS_ACTIVE).set(active as f64);
    }
}

/// Scheduler metrics recorder.
#[derive(Clone)]
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Record a recurring job enqueued.
    pub fn job_triggered(job_type: &str) {
        counter!(
            names::SCHEDULER_JOBS_TRIGGERED,
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }
}
