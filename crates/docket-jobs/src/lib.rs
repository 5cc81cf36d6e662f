//! Docket Jobs - durable at-least-once job queue engine
//!
//! - Job documents persisted in a shared store with an atomic claim
//! - Bounded-concurrency dispatcher with exponential-backoff retries
//! - Recovery of claims abandoned by crashed workers
//! - Cron-driven recurring jobs at minute granularity
//!
//! # Architecture
//!
//! ```text
//!  producers ──► JobEnqueuer ──┐
//!                              ▼
//!  RecurringScheduler ──► JobStore ◄── StaleJobReaper
//!                              │
//!                              ▼ claim_next_due
//!                         Dispatcher ──► ExecutorRegistry ──► JobExecutor
//!                              │
//!                              └── save (Completed | Pending + backoff | Failed)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use docket_jobs::{Dispatcher, DispatcherConfig, ExecutorRegistry, InMemoryJobStore, JobEnqueuer};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryJobStore::new());
//! let registry = Arc::new(ExecutorRegistry::new());
//! registry.register("echo", || EchoExecutor);
//!
//! JobEnqueuer::new(store.clone())
//!     .enqueue("echo", Some(&serde_json::json!({ "msg": "hi" })))
//!     .await?;
//!
//! let dispatcher = Dispatcher::new(store, registry, DispatcherConfig::default());
//! dispatcher.run(cancel_token).await?;
//! ```

pub mod dispatcher;
pub mod enqueuer;
pub mod error;
pub mod executor;
pub mod job;
pub mod metrics;
pub mod reaper;
pub mod retry;
pub mod scheduler;
pub mod store;

pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats, WorkerOutcome};
pub use enqueuer::JobEnqueuer;
pub use error::{JobError, JobResult};
pub use executor::{decode_payload, ExecutorFactory, ExecutorRegistry, JobExecutor};
pub use job::{FailureOutcome, JobId, JobRecord, JobStatus};
pub use metrics::register_metrics;
pub use reaper::StaleJobReaper;
pub use retry::RetryPolicy;
pub use scheduler::{RecurringJob, RecurringJobInfo, RecurringScheduler};
pub use store::{create_pool, InMemoryJobStore, JobStore, RedisJobStore, StoreKeys};

pub use tokio_util::sync::CancellationToken;
