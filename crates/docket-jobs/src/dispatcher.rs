//! Worker pool loop: claims due jobs, runs their executors and records the
//! outcome.

use crate::error::{JobError, JobResult};
use crate::executor::ExecutorRegistry;
use crate::job::{FailureOutcome, JobRecord};
use crate::metrics::{JobMetrics, WorkerMetrics};
use crate::retry::RetryPolicy;
use crate::store::JobStore;
use chrono::{DateTime, Utc};
use docket_config::JobSettings;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delay between ticks.
    pub poll_interval: Duration,

    /// Upper bound on concurrently running workers.
    pub max_concurrent_jobs: usize,

    /// Backoff and retry budget for failed attempts.
    pub retry: RetryPolicy,

    /// Fail jobs with no registered executor instead of retrying them.
    pub fail_unknown_job_types: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_concurrent_jobs: 10,
            retry: RetryPolicy::default(),
            fail_unknown_job_types: false,
        }
    }
}

impl From<&JobSettings> for DispatcherConfig {
    fn from(settings: &JobSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            max_concurrent_jobs: settings.max_concurrent_jobs.max(1),
            retry: RetryPolicy::exponential(settings.max_retries),
            fail_unknown_job_types: settings.fail_unknown_job_types,
        }
    }
}

/// Result of one claim-and-execute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// No job was due.
    Idle,
    /// The job completed.
    Completed,
    /// The attempt failed and the job was rescheduled.
    Retrying,
    /// The job is terminally failed.
    Failed,
}

/// Dispatcher statistics.
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    /// Is the poll loop running.
    pub running: bool,

    /// Configured concurrency.
    pub max_concurrent_jobs: usize,

    /// Workers currently holding a slot.
    pub active_workers: usize,

    /// Jobs completed.
    pub jobs_completed: u64,

    /// Failed attempts rescheduled.
    pub jobs_retried: u64,

    /// Jobs terminally failed.
    pub jobs_failed: u64,
}

struct Inner {
    store: Arc<dyn JobStore>,
    registry: Arc<ExecutorRegistry>,
    config: DispatcherConfig,
    slots: Arc<Semaphore>,
    /// Handed to every executor. Fired when a run shuts down, then replaced.
    executions: Mutex<CancellationToken>,
    running: AtomicBool,
    jobs_completed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_failed: AtomicU64,
}

/// Bounded-concurrency worker pool over a [`JobStore`].
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<ExecutorRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        let max = config.max_concurrent_jobs.max(1);

        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                slots: Arc::new(Semaphore::new(max)),
                config: DispatcherConfig {
                    max_concurrent_jobs: max,
                    ..config
                },
                executions: Mutex::new(CancellationToken::new()),
                running: AtomicBool::new(false),
                jobs_completed: AtomicU64::new(0),
                jobs_retried: AtomicU64::new(0),
                jobs_failed: AtomicU64::new(0),
            }),
        }
    }

    /// Dispatcher configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Poll until `cancel` fires, then wait for in-flight workers.
    ///
    /// Each tick fills every free slot with a worker that attempts exactly
    /// one claim-and-execute cycle. Running executors see the cancellation
    /// but are never aborted.
    pub async fn run(&self, cancel: CancellationToken) -> JobResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Internal("Dispatcher already running".to_string()));
        }

        info!(
            max_concurrent_jobs = self.inner.config.max_concurrent_jobs,
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            max_retries = self.inner.config.retry.max_retries,
            "Starting job dispatcher"
        );

        let executions = CancellationToken::new();
        *self.inner.executions.lock() = executions.clone();
        let mut workers = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            while let Some(finished) = workers.try_join_next() {
                if let Err(e) = finished {
                    error!(error = %e, "Worker task aborted");
                }
            }

            while let Ok(permit) = self.inner.slots.clone().try_acquire_owned() {
                let inner = self.inner.clone();
                let executions = executions.clone();
                workers.spawn(
                    async move {
                        let _permit = permit;
                        if let Err(e) = cycle(&inner, Utc::now(), &executions).await {
                            if e.is_store_error() {
                                error!(error = %e, "Job store unavailable");
                            } else {
                                error!(error = %e, "Worker cycle failed");
                            }
                        }
                    }
                    .instrument(info_span!("worker")),
                );
            }

            WorkerMetrics::update_active(self.active_workers());

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.inner.config.poll_interval) => {}
            }
        }

        info!(in_flight = workers.len(), "Dispatcher stopping, waiting for workers to finish...");
        executions.cancel();

        while let Some(finished) = workers.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "Worker task aborted");
            }
        }

        WorkerMetrics::update_active(0);
        *self.inner.executions.lock() = CancellationToken::new();
        self.inner.running.store(false, Ordering::SeqCst);

        let stats = self.stats();
        info!(
            completed = stats.jobs_completed,
            retried = stats.jobs_retried,
            failed = stats.jobs_failed,
            "Job dispatcher stopped"
        );

        Ok(())
    }

    /// Run one claim-and-execute cycle on the calling task.
    ///
    /// The executor observes the shutdown of the current `run`, if any.
    pub async fn process_next(&self, now: DateTime<Utc>) -> JobResult<WorkerOutcome> {
        let executions = self.inner.executions.lock().clone();
        cycle(&self.inner, now, &executions).await
    }

    /// Workers currently holding a slot.
    pub fn active_workers(&self) -> usize {
        self.inner.config.max_concurrent_jobs - self.inner.slots.available_permits()
    }

    /// Snapshot of dispatcher counters.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            running: self.inner.running.load(Ordering::SeqCst),
            max_concurrent_jobs: self.inner.config.max_concurrent_jobs,
            active_workers: self.active_workers(),
            jobs_completed: self.inner.jobs_completed.load(Ordering::Relaxed),
            jobs_retried: self.inner.jobs_retried.load(Ordering::Relaxed),
            jobs_failed: self.inner.jobs_failed.load(Ordering::Relaxed),
        }
    }
}

async fn cycle(
    inner: &Inner,
    now: DateTime<Utc>,
    executions: &CancellationToken,
) -> JobResult<WorkerOutcome> {
    let Some(job) = inner.store.claim_next_due(now).await? else {
        return Ok(WorkerOutcome::Idle);
    };

    JobMetrics::job_claimed(&job.job_type);

    let span = info_span!(
        "job",
        job_id = %job.id,
        job_type = %job.job_type,
        attempt = job.retry_count + 1
    );
    execute_claimed(inner, job, executions).instrument(span).await
}

async fn execute_claimed(
    inner: &Inner,
    mut job: JobRecord,
    executions: &CancellationToken,
) -> JobResult<WorkerOutcome> {
    debug!("Processing job");
    let started = Instant::now();

    let result = match inner.registry.resolve(&job.job_type) {
        Ok(executor) => {
            AssertUnwindSafe(executor.execute(job.payload.as_deref(), executions))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(JobError::failed(panic_message(panic.as_ref()))))
        }
        Err(e) => Err(e),
    };

    let elapsed = started.elapsed();
    let now = Utc::now();

    let error = match result {
        Ok(()) => {
            job.complete(now);
            inner.store.save(&job).await?;

            inner.jobs_completed.fetch_add(1, Ordering::Relaxed);
            JobMetrics::job_completed(&job.job_type, elapsed);
            info!(duration_ms = elapsed.as_millis() as u64, "Job completed");
            return Ok(WorkerOutcome::Completed);
        }
        Err(e) => e,
    };

    let permanent = inner.config.fail_unknown_job_types && matches!(error, JobError::UnknownJobType(_));
    let outcome = if permanent {
        job.fail_permanently(error.to_string(), now);
        FailureOutcome::Failed
    } else {
        job.record_failure(error.to_string(), now, &inner.config.retry)
    };

    inner.store.save(&job).await?;

    match outcome {
        FailureOutcome::Retry { at } => {
            inner.jobs_retried.fetch_add(1, Ordering::Relaxed);
            JobMetrics::job_retried(&job.job_type, job.retry_count, elapsed);
            warn!(
                error = %error,
                retry_count = job.retry_count,
                scheduled_at = %at,
                "Job failed, rescheduled"
            );
            Ok(WorkerOutcome::Retrying)
        }
        FailureOutcome::Failed => {
            inner.jobs_failed.fetch_add(1, Ordering::Relaxed);
            JobMetrics::job_failed(&job.job_type, elapsed);
            error!(error = %error, retry_count = job.retry_count, "Job failed permanently");
            Ok(WorkerOutcome::Failed)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("executor panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("executor panicked: {s}")
    } else {
        "executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::JobExecutor;
    use crate::job::JobStatus;
    use crate::job::JobId;
    use crate::store::InMemoryJobStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Panics;

    /// Finishes after a short delay unless cancelled first.
    struct Cooperative;

    #[async_trait]
    impl JobExecutor for Cooperative {
        async fn execute(&self, _: Option<&str>, cancel: &CancellationToken) -> JobResult<()> {
            tokio::select! {
                _ = cancel.cancelled() => Err(JobError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(10)) => Ok(()),
            }
        }
    }

    /// In-memory store whose claims and saves can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        jobs: InMemoryJobStore,
        fail_claims: AtomicBool,
        fail_saves: AtomicBool,
        claim_attempts: AtomicUsize,
    }

    fn unavailable() -> JobError {
        JobError::Store("connection refused".to_string())
    }

    #[async_trait]
    impl JobStore for FlakyStore {
        async fn insert(&self, job: &JobRecord) -> JobResult<JobId> {
            self.jobs.insert(job).await
        }

        async fn claim_next_due(&self, now: DateTime<Utc>) -> JobResult<Option<JobRecord>> {
            self.claim_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_claims.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.jobs.claim_next_due(now).await
        }

        async fn save(&self, job: &JobRecord) -> JobResult<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            self.jobs.save(job).await
        }

        async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
            self.jobs.reclaim_stale(cutoff).await
        }

        async fn get(&self, id: &JobId) -> JobResult<Option<JobRecord>> {
            self.jobs.get(id).await
        }

        async fn health_check(&self) -> JobResult<()> {
            Ok(())
        }
    }

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: Duration::from_millis(10),
            max_concurrent_jobs: 2,
            ..DispatcherConfig::default()
        }
    }

    async fn wait_for_status(store: &dyn JobStore, id: &JobId, status: JobStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store.get(id).await.unwrap().is_some_and(|job| job.status == status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job never reached expected status");
    }

    #[async_trait]
    impl JobExecutor for Panics {
        async fn execute(&self, _: Option<&str>, _: &CancellationToken) -> JobResult<()> {
            panic!("boom");
        }
    }

    fn dispatcher(store: Arc<InMemoryJobStore>, config: DispatcherConfig) -> (Dispatcher, Arc<ExecutorRegistry>) {
        let registry = Arc::new(ExecutorRegistry::new());
        (Dispatcher::new(store, registry.clone(), config), registry)
    }

    #[test]
    fn test_config_from_settings() {
        let settings = JobSettings {
            max_retries: 3,
            poll_interval_seconds: 7,
            max_concurrent_jobs: 4,
            fail_unknown_job_types: true,
            ..JobSettings::default()
        };

        let config = DispatcherConfig::from(&settings);
        assert_eq!(config.poll_interval, Duration::from_secs(7));
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.fail_unknown_job_types);
    }

    #[tokio::test]
    async fn test_idle_when_nothing_due() {
        let store = Arc::new(InMemoryJobStore::new());
        let (dispatcher, _) = dispatcher(store, DispatcherConfig::default());

        assert_eq!(dispatcher.process_next(Utc::now()).await.unwrap(), WorkerOutcome::Idle);
        assert_eq!(dispatcher.stats().jobs_completed, 0);
    }

    #[tokio::test]
    async fn test_panic_is_a_failed_attempt() {
        let store = Arc::new(InMemoryJobStore::new());
        let (dispatcher, registry) = dispatcher(store.clone(), DispatcherConfig::default());
        registry.register("panics", || Panics);

        let job = JobRecord::pending("panics", None, Utc::now());
        store.insert(&job).await.unwrap();

        let outcome = dispatcher.process_next(Utc::now()).await.unwrap();
        assert_eq!(outcome, WorkerOutcome::Retrying);

        let job = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.error_message.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_unknown_job_type_retries_by_default() {
        let store = Arc::new(InMemoryJobStore::new());
        let (dispatcher, _) = dispatcher(store.clone(), DispatcherConfig::default());

        let job = JobRecord::pending("ghost", None, Utc::now());
        store.insert(&job).await.unwrap();

        assert_eq!(dispatcher.process_next(Utc::now()).await.unwrap(), WorkerOutcome::Retrying);
        let job = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_job_type_fails_when_configured() {
        let store = Arc::new(InMemoryJobStore::new());
        let config = DispatcherConfig {
            fail_unknown_job_types: true,
            ..DispatcherConfig::default()
        };
        let (dispatcher, _) = dispatcher(store.clone(), config);

        let job = JobRecord::pending("ghost", None, Utc::now());
        store.insert(&job).await.unwrap();

        assert_eq!(dispatcher.process_next(Utc::now()).await.unwrap(), WorkerOutcome::Failed);
        let job = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.failed_at.is_some());
        assert_eq!(dispatcher.stats().jobs_failed, 1);
    }

    #[tokio::test]
    async fn test_run_rejects_second_loop() {
        let store = Arc::new(InMemoryJobStore::new());
        let (dispatcher, _) = dispatcher(store, DispatcherConfig::default());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let cancel = cancel.clone();
            async move { dispatcher.run(cancel).await }
        });

        while !dispatcher.stats().running {
            tokio::task::yield_now().await;
        }
        assert!(dispatcher.run(CancellationToken::new()).await.is_err());

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(!dispatcher.stats().running);
        assert_eq!(dispatcher.active_workers(), 0);
    }

    #[tokio::test]
    async fn test_restarted_dispatcher_does_not_cancel_executors() {
        let store = Arc::new(InMemoryJobStore::new());
        let (dispatcher, registry) = dispatcher(store.clone(), fast_config());
        registry.register("cooperative", || Cooperative);

        let first = CancellationToken::new();
        let handle = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let cancel = first.clone();
            async move { dispatcher.run(cancel).await }
        });
        first.cancel();
        handle.await.unwrap().unwrap();

        let job = JobRecord::pending("cooperative", None, Utc::now());
        store.insert(&job).await.unwrap();
        assert_eq!(dispatcher.process_next(Utc::now()).await.unwrap(), WorkerOutcome::Completed);
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 0);

        let second = CancellationToken::new();
        let handle = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let cancel = second.clone();
            async move { dispatcher.run(cancel).await }
        });

        let job = JobRecord::pending("cooperative", None, Utc::now());
        store.insert(&job).await.unwrap();
        wait_for_status(store.as_ref(), &job.id, JobStatus::Completed).await;

        second.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(dispatcher.stats().jobs_completed, 2);
        assert_eq!(dispatcher.stats().jobs_retried, 0);
    }

    #[tokio::test]
    async fn test_store_errors_surface_from_process_next() {
        let store = Arc::new(FlakyStore::default());
        let registry = Arc::new(ExecutorRegistry::new());
        registry.register("cooperative", || Cooperative);
        let dispatcher = Dispatcher::new(store.clone(), registry, fast_config());

        store.fail_claims.store(true, Ordering::SeqCst);
        let err = dispatcher.process_next(Utc::now()).await.unwrap_err();
        assert!(err.is_store_error());

        store.fail_claims.store(false, Ordering::SeqCst);
        store.fail_saves.store(true, Ordering::SeqCst);
        let job = JobRecord::pending("cooperative", None, Utc::now());
        store.insert(&job).await.unwrap();

        let err = dispatcher.process_next(Utc::now()).await.unwrap_err();
        assert!(err.is_store_error());

        // The claim stuck; recovery is left to the stale reaper.
        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(dispatcher.stats().jobs_completed, 0);
        assert_eq!(dispatcher.active_workers(), 0);
    }

    #[tokio::test]
    async fn test_run_recovers_after_store_outage() {
        let store = Arc::new(FlakyStore::default());
        let registry = Arc::new(ExecutorRegistry::new());
        registry.register("cooperative", || Cooperative);
        let dispatcher = Dispatcher::new(store.clone(), registry, fast_config());

        store.fail_claims.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let cancel = cancel.clone();
            async move { dispatcher.run(cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.claim_attempts.load(Ordering::SeqCst) < 6 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            while dispatcher.active_workers() != 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("failed claims leaked worker slots");

        store.fail_claims.store(false, Ordering::SeqCst);
        let job = JobRecord::pending("cooperative", None, Utc::now());
        store.insert(&job).await.unwrap();
        wait_for_status(store.as_ref(), &job.id, JobStatus::Completed).await;

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(dispatcher.active_workers(), 0);
        assert_eq!(dispatcher.stats().jobs_completed, 1);
    }
}
