//! Job record store contract and backends.
//!
//! The store is the only coordination point between workers, including
//! workers in other processes: exclusivity of a claim comes entirely from
//! [`JobStore::claim_next_due`] being atomic.

mod memory;
mod redis;

pub use self::memory::InMemoryJobStore;
pub use self::redis::{create_pool, RedisJobStore, StoreKeys};

use crate::error::JobResult;
use crate::job::{JobId, JobRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable collection of job documents.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates a new document.
    async fn insert(&self, job: &JobRecord) -> JobResult<JobId>;

    /// Atomically moves one pending job with `scheduled_at <= now` to
    /// processing and returns it in its claimed state.
    ///
    /// Concurrent callers never receive the same job. Which eligible job is
    /// picked is unspecified.
    async fn claim_next_due(&self, now: DateTime<Utc>) -> JobResult<Option<JobRecord>>;

    /// Replaces the stored document with `job`. Last writer wins.
    async fn save(&self, job: &JobRecord) -> JobResult<()>;

    /// Moves every processing job claimed before `cutoff` back to pending,
    /// clearing its claim timestamp. Returns how many moved.
    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> JobResult<u64>;

    /// Fetches a document by id.
    async fn get(&self, id: &JobId) -> JobResult<Option<JobRecord>>;

    /// Checks that the store is reachable.
    async fn health_check(&self) -> JobResult<()>;
}
