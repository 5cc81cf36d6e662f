//! Server startup: builds the job engine and runs it next to the HTTP API.

use crate::jobs::{recurring_jobs, register_executors};
use crate::rest::{create_router, AppState};
use anyhow::Context;
use chrono::Utc;
use docket_config::{AppConfig, StoreBackend, StoreConfig};
use docket_jobs::{
    create_pool, register_metrics, CancellationToken, Dispatcher, DispatcherConfig,
    ExecutorRegistry, InMemoryJobStore, JobEnqueuer, JobResult, JobStore, RecurringScheduler,
    RedisJobStore, StaleJobReaper,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Build the configured job store.
pub async fn build_store(config: &StoreConfig) -> JobResult<Arc<dyn JobStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let pool = create_pool(config).await?;
            info!(namespace = %config.namespace(), "Using Redis job store");
            Ok(Arc::new(RedisJobStore::new(pool, config)))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory job store; jobs are lost on restart");
            Ok(Arc::new(InMemoryJobStore::new()))
        }
    }
}

/// Run until `shutdown` fires.
///
/// Stale claims are reset before the dispatcher starts polling. The
/// dispatcher, scheduler, optional periodic reaper and HTTP server then run
/// concurrently; on shutdown the dispatcher drains in-flight jobs before
/// this returns.
pub async fn run(config: AppConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    register_metrics();

    let store = build_store(&config.store)
        .await
        .context("Failed to initialize job store")?;

    let registry = Arc::new(ExecutorRegistry::new());
    register_executors(&registry);
    info!(job_types = ?registry.job_types(), "Executors registered");

    let reaper = StaleJobReaper::new(store.clone(), config.jobs.stale_timeout());
    reaper
        .reap(Utc::now())
        .await
        .context("Failed to reset stale jobs")?;

    let dispatcher = Dispatcher::new(
        store.clone(),
        registry,
        DispatcherConfig::from(&config.jobs),
    );
    let dispatcher_task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.clone();
        async move { dispatcher.run(shutdown).await }
    });

    let mut background: Vec<JoinHandle<()>> = Vec::new();

    if let Some(interval) = config.jobs.reap_interval() {
        let shutdown = shutdown.clone();
        background.push(tokio::spawn(async move {
            reaper.run_periodic(interval, shutdown).await;
        }));
    }

    if config.scheduler.enabled {
        let scheduler = recurring_jobs()
            .context("Invalid recurring job table")?
            .into_iter()
            .fold(
                RecurringScheduler::new(
                    JobEnqueuer::new(store.clone()),
                    config.scheduler.startup_delay(),
                ),
                RecurringScheduler::with_job,
            );

        for job in scheduler.jobs() {
            info!(
                job_type = %job.job_type,
                cron = %job.expression,
                next_fire = ?job.next_fire,
                "Recurring job scheduled"
            );
        }

        let shutdown = shutdown.clone();
        background.push(tokio::spawn(async move {
            scheduler.run(shutdown).await;
        }));
    } else {
        info!("Recurring job scheduler disabled");
    }

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Starting REST server on http://{}", addr);

    let router = create_router(AppState::new(store));
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    // The server can also stop on its own error; everything else follows it.
    shutdown.cancel();

    match dispatcher_task.await {
        Ok(Err(e)) => error!(error = %e, "Dispatcher stopped with error"),
        Err(e) => error!(error = %e, "Dispatcher task panicked"),
        Ok(Ok(())) => {}
    }
    for task in background {
        if let Err(e) = task.await {
            error!(error = %e, "Background task panicked");
        }
    }

    served.context("REST server error")?;

    info!("Server shutdown complete");
    Ok(())
}
