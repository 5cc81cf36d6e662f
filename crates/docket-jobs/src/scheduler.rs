//! Cron-driven injection of recurring jobs.
//!
//! Matching is at minute granularity: an entry fires at most once for a
//! minute in which it is due, and minutes during which the process was not
//! running are never backfilled.

use crate::enqueuer::JobEnqueuer;
use crate::error::{JobError, JobResult};
use crate::metrics::SchedulerMetrics;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One entry of the recurring table.
#[derive(Debug, Clone)]
pub struct RecurringJob {
    /// Cron expression as given.
    pub expression: String,

    /// Parsed schedule.
    schedule: Schedule,

    /// Job type enqueued when the entry fires.
    pub job_type: String,

    /// Payload attached to every enqueued instance.
    pub payload: Option<String>,
}

impl RecurringJob {
    /// Create an entry from a 5-field cron expression (`min hour dom mon dow`)
    /// or the 6/7-field form with seconds and year.
    pub fn new(expression: &str, job_type: impl Into<String>) -> JobResult<Self> {
        let expression = expression.trim();
        let normalized = if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.to_string()
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            JobError::Scheduler(format!("Invalid cron expression '{expression}': {e}"))
        })?;

        let job_type = job_type.into();
        if job_type.trim().is_empty() {
            return Err(JobError::Scheduler("job type must not be empty".to_string()));
        }

        Ok(Self {
            expression: expression.to_string(),
            schedule,
            job_type,
            payload: None,
        })
    }

    /// Attach a serialized payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// True iff the schedule has an occurrence inside the minute containing
    /// `now`.
    pub fn fires_in_minute(&self, now: DateTime<Utc>) -> bool {
        let minute = truncate_to_minute(now);
        // `after` is exclusive, so step back one second to include :00.
        self.schedule
            .after(&(minute - ChronoDuration::seconds(1)))
            .next()
            .is_some_and(|next| next < minute + ChronoDuration::minutes(1))
    }

    /// Next occurrence strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }
}

/// Description of a recurring entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringJobInfo {
    /// Cron expression.
    pub expression: String,

    /// Job type enqueued.
    pub job_type: String,

    /// Next fire time.
    pub next_fire: Option<DateTime<Utc>>,
}

/// Evaluates a fixed recurring table once per wall-clock minute.
pub struct RecurringScheduler {
    jobs: Vec<RecurringJob>,
    enqueuer: JobEnqueuer,
    startup_delay: Duration,
}

impl RecurringScheduler {
    /// Create a scheduler with an empty table.
    pub fn new(enqueuer: JobEnqueuer, startup_delay: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            enqueuer,
            startup_delay,
        }
    }

    /// Append an entry. The table is fixed once the scheduler runs.
    #[must_use]
    pub fn with_job(mut self, job: RecurringJob) -> Self {
        self.jobs.push(job);
        self
    }

    /// Entries with their next fire time.
    pub fn jobs(&self) -> Vec<RecurringJobInfo> {
        let now = Utc::now();
        self.jobs
            .iter()
            .map(|job| RecurringJobInfo {
                expression: job.expression.clone(),
                job_type: job.job_type.clone(),
                next_fire: job.next_after(now),
            })
            .collect()
    }

    /// Enqueue one instance of every entry due in `now`'s minute. Returns how
    /// many were enqueued.
    pub async fn evaluate(&self, now: DateTime<Utc>) -> usize {
        let mut enqueued = 0;

        for job in self.jobs.iter().filter(|job| job.fires_in_minute(now)) {
            match self.enqueuer.enqueue_raw(&job.job_type, job.payload.clone()).await {
                Ok(job_id) => {
                    enqueued += 1;
                    SchedulerMetrics::job_triggered(&job.job_type);
                    info!(
                        job_id = %job_id,
                        job_type = %job.job_type,
                        cron = %job.expression,
                        "Enqueued recurring job"
                    );
                }
                Err(e) => {
                    error!(
                        job_type = %job.job_type,
                        cron = %job.expression,
                        error = %e,
                        "Failed to enqueue recurring job"
                    );
                }
            }
        }

        enqueued
    }

    /// Evaluate `now`'s minute unless `last_minute` shows it was already
    /// evaluated. Returns how many jobs were enqueued.
    pub async fn tick(&self, now: DateTime<Utc>, last_minute: &mut Option<DateTime<Utc>>) -> usize {
        let minute = truncate_to_minute(now);
        if *last_minute == Some(minute) {
            return 0;
        }

        let enqueued = self.evaluate(now).await;
        debug!(minute = %minute, enqueued, "Evaluated recurring jobs");
        *last_minute = Some(minute);
        enqueued
    }

    /// Wait out the startup delay, then evaluate once per minute until
    /// cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            entries = self.jobs.len(),
            startup_delay_secs = self.startup_delay.as_secs(),
            "Starting recurring job scheduler"
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.startup_delay) => {}
        }

        let mut last_minute: Option<DateTime<Utc>> = None;

        loop {
            let now = Utc::now();
            let minute = truncate_to_minute(now);
            self.tick(now, &mut last_minute).await;

            let wait = (minute + ChronoDuration::minutes(1) - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Recurring job scheduler stopped");
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(t)
}
