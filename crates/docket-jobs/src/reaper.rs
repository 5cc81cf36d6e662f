//! Recovery of claims abandoned by crashed workers.

use crate::error::JobResult;
use crate::metrics::JobMetrics;
use crate::store::JobStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Returns processing jobs older than the staleness window to pending.
#[derive(Clone)]
pub struct StaleJobReaper {
    store: Arc<dyn JobStore>,
    stale_timeout: Duration,
}

impl StaleJobReaper {
    /// Create a reaper for claims older than `stale_timeout`.
    pub fn new(store: Arc<dyn JobStore>, stale_timeout: Duration) -> Self {
        Self {
            store,
            stale_timeout,
        }
    }

    /// Staleness window.
    pub fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }

    /// Reclaim every job claimed strictly before `now - stale_timeout`.
    pub async fn reap(&self, now: DateTime<Utc>) -> JobResult<u64> {
        let window = ChronoDuration::from_std(self.stale_timeout)
            .unwrap_or_else(|_| ChronoDuration::days(36_500));
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let count = self.store.reclaim_stale(cutoff).await?;

        if count > 0 {
            JobMetrics::jobs_reclaimed(count);
            warn!(count, cutoff = %cutoff, "Reset stale jobs back to pending");
        } else {
            debug!(cutoff = %cutoff, "No stale jobs found");
        }

        Ok(count)
    }

    /// Reap every `interval` until cancelled. Store failures are logged and
    /// retried on the next tick.
    pub async fn run_periodic(&self, interval: Duration, cancel: CancellationToken) {
        info!(
            interval_secs = interval.as_secs(),
            stale_timeout_secs = self.stale_timeout.as_secs(),
            "Starting periodic stale job reaper"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.reap(Utc::now()).await {
                        error!(error = %e, "Stale job reaping failed");
                    }
                }
            }
        }

        info!("Periodic stale job reaper stopped");
    }
}
