//! End-to-end job lifecycle tests against the in-memory store.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use docket_jobs::{
    decode_payload, CancellationToken, Dispatcher, DispatcherConfig, ExecutorRegistry,
    InMemoryJobStore, JobEnqueuer, JobError, JobExecutor, JobRecord, JobResult, JobStatus,
    JobStore, RecurringJob, RecurringScheduler, RetryPolicy, StaleJobReaper, WorkerOutcome,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Deserialize)]
struct EchoPayload {
    msg: String,
}

struct Echo {
    seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl JobExecutor for Echo {
    async fn execute(&self, payload: Option<&str>, _: &CancellationToken) -> JobResult<()> {
        let payload: EchoPayload = decode_payload(payload)?;
        self.seen.lock().push(payload.msg);
        Ok(())
    }
}

struct AlwaysFails;

#[async_trait]
impl JobExecutor for AlwaysFails {
    async fn execute(&self, _: Option<&str>, _: &CancellationToken) -> JobResult<()> {
        Err(JobError::failed("downstream unavailable"))
    }
}

struct WaitsForShutdown {
    started: Arc<Notify>,
}

#[async_trait]
impl JobExecutor for WaitsForShutdown {
    async fn execute(&self, _: Option<&str>, cancel: &CancellationToken) -> JobResult<()> {
        self.started.notify_one();
        cancel.cancelled().await;
        Err(JobError::Cancelled)
    }
}

struct TracksConcurrency {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl JobExecutor for TracksConcurrency {
    async fn execute(&self, _: Option<&str>, _: &CancellationToken) -> JobResult<()> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn fast_config(max_retries: u32) -> DispatcherConfig {
    DispatcherConfig {
        poll_interval: Duration::from_millis(20),
        max_concurrent_jobs: 4,
        retry: RetryPolicy::exponential(max_retries),
        fail_unknown_job_types: false,
    }
}

async fn wait_for_status(store: &InMemoryJobStore, status: JobStatus, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.jobs_with_status(status).len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timed out waiting for job status");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_job_has_single_claimer() {
    let store = Arc::new(InMemoryJobStore::new());
    let now = Utc::now();
    store.insert(&JobRecord::pending("once", None, now)).await.unwrap();

    let mut claimers = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        claimers.push(tokio::spawn(async move { store.claim_next_due(now).await }));
    }

    let mut winners = 0;
    for claimer in claimers {
        if claimer.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_echo_job_completes_through_run_loop() {
    let store = Arc::new(InMemoryJobStore::new());
    let registry = Arc::new(ExecutorRegistry::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    registry.register("Echo", {
        let seen = seen.clone();
        move || Echo { seen: seen.clone() }
    });

    let id = JobEnqueuer::new(store.clone())
        .enqueue("Echo", Some(&serde_json::json!({ "msg": "hi" })))
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(store.clone(), registry, fast_config(5));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    wait_for_status(&store, JobStatus::Completed, 1).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let job = store.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert!(job.processing_started_at.is_none());
    assert_eq!(job.retry_count, 0);
    assert_eq!(*seen.lock(), vec!["hi".to_string()]);
    assert_eq!(dispatcher.stats().jobs_completed, 1);
}

#[tokio::test]
async fn test_always_failing_job_with_two_retries() {
    let store = Arc::new(InMemoryJobStore::new());
    let registry = Arc::new(ExecutorRegistry::new());
    registry.register("flaky", || AlwaysFails);
    let dispatcher = Dispatcher::new(store.clone(), registry, fast_config(2));

    let id = JobEnqueuer::new(store.clone()).enqueue_raw("flaky", None).await.unwrap();

    let before = Utc::now();
    assert_eq!(dispatcher.process_next(before).await.unwrap(), WorkerOutcome::Retrying);
    let after = Utc::now();

    let job = store.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.error_message.as_deref(), Some("Job execution failed: downstream unavailable"));
    assert!(job.scheduled_at >= before + ChronoDuration::seconds(60));
    assert!(job.scheduled_at <= after + ChronoDuration::seconds(60));

    // Not due again until the backoff elapses.
    assert_eq!(dispatcher.process_next(after).await.unwrap(), WorkerOutcome::Idle);

    let outcome = dispatcher.process_next(job.scheduled_at).await.unwrap();
    assert_eq!(outcome, WorkerOutcome::Failed);

    let job = store.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 2);
    assert!(job.failed_at.is_some());
    assert_eq!(dispatcher.process_next(job.scheduled_at + ChronoDuration::days(1)).await.unwrap(), WorkerOutcome::Idle);
}

#[tokio::test]
async fn test_job_fails_exactly_max_retries_times() {
    let store = Arc::new(InMemoryJobStore::new());
    let registry = Arc::new(ExecutorRegistry::new());
    registry.register("flaky", || AlwaysFails);
    let dispatcher = Dispatcher::new(store.clone(), registry, fast_config(5));

    let id = JobEnqueuer::new(store.clone()).enqueue_raw("flaky", None).await.unwrap();

    let mut attempts = 0;
    let mut previous_delay = ChronoDuration::zero();
    loop {
        let due = store.get(&id).await.unwrap().unwrap().scheduled_at;
        let failed_at = Utc::now();
        let outcome = dispatcher.process_next(due).await.unwrap();
        attempts += 1;

        let job = store.get(&id).await.unwrap().unwrap();
        if outcome == WorkerOutcome::Failed {
            assert_eq!(job.retry_count, 5);
            break;
        }

        assert_eq!(outcome, WorkerOutcome::Retrying);
        let delay = job.scheduled_at - failed_at;
        assert!(delay > previous_delay);
        previous_delay = delay;
    }

    assert_eq!(attempts, 5);
    let stats = dispatcher.stats();
    assert_eq!(stats.jobs_retried, 4);
    assert_eq!(stats.jobs_failed, 1);
}

#[tokio::test]
async fn test_stale_claim_recovered_without_counting_failure() {
    let store = Arc::new(InMemoryJobStore::new());
    let now = Utc::now();

    let mut job = JobRecord::pending("slow", None, now - ChronoDuration::hours(1));
    job.claim(now - ChronoDuration::minutes(31));
    store.insert(&job).await.unwrap();

    let reaper = StaleJobReaper::new(store.clone(), Duration::from_secs(30 * 60));
    assert_eq!(reaper.reap(now).await.unwrap(), 1);
    assert_eq!(reaper.reap(now).await.unwrap(), 0);

    let job = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.processing_started_at.is_none());
    assert_eq!(job.retry_count, 0);
}

#[tokio::test]
async fn test_shutdown_signals_running_executors_and_drains() {
    let store = Arc::new(InMemoryJobStore::new());
    let registry = Arc::new(ExecutorRegistry::new());
    let started = Arc::new(Notify::new());
    registry.register("long", {
        let started = started.clone();
        move || WaitsForShutdown {
            started: started.clone(),
        }
    });

    let id = JobEnqueuer::new(store.clone()).enqueue_raw("long", None).await.unwrap();

    let dispatcher = Dispatcher::new(store.clone(), registry, fast_config(5));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    tokio::time::timeout(Duration::from_secs(5), started.notified())
        .await
        .expect("Executor never started");
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(dispatcher.active_workers(), 0);
    let job = store.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_is_bounded() {
    let store = Arc::new(InMemoryJobStore::new());
    let registry = Arc::new(ExecutorRegistry::new());
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    registry.register("tracked", {
        let current = current.clone();
        let peak = peak.clone();
        move || TracksConcurrency {
            current: current.clone(),
            peak: peak.clone(),
        }
    });

    let enqueuer = JobEnqueuer::new(store.clone());
    for _ in 0..8 {
        enqueuer.enqueue_raw("tracked", None).await.unwrap();
    }

    let config = DispatcherConfig {
        max_concurrent_jobs: 2,
        ..fast_config(5)
    };
    let dispatcher = Dispatcher::new(store.clone(), registry, config);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    wait_for_status(&store, JobStatus::Completed, 8).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(dispatcher.stats().jobs_completed, 8);
}

#[tokio::test]
async fn test_recurring_entry_fires_once_in_its_minute() {
    let store = Arc::new(InMemoryJobStore::new());
    let scheduler = RecurringScheduler::new(JobEnqueuer::new(store.clone()), Duration::ZERO)
        .with_job(RecurringJob::new("0 3 * * *", "nightly").unwrap());

    let due_minute = Utc.with_ymd_and_hms(2026, 5, 1, 3, 0, 12).unwrap();
    assert_eq!(scheduler.evaluate(due_minute).await, 1);

    // Evaluations after the minute has passed never backfill it.
    let missed = Utc.with_ymd_and_hms(2026, 5, 2, 3, 1, 0).unwrap();
    assert_eq!(scheduler.evaluate(missed).await, 0);

    let pending = store.jobs_with_status(JobStatus::Pending);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].job_type, "nightly");
    assert!(pending[0].payload.is_none());
}
