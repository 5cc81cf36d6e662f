//! Redis-backed job store.
//!
//! Each job is a JSON document under `{ns}:job:{id}`. Two sorted sets index
//! the documents that the engine queries by time:
//! - `{ns}:pending`, scored by `scheduled_at` in milliseconds
//! - `{ns}:processing`, scored by `processing_started_at` in milliseconds
//!
//! Claims and reclaims run as Lua scripts, which Redis executes atomically,
//! so they are linearizable across every process sharing the instance.

use super::JobStore;
use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobRecord, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use deadpool_redis::{Config, Pool, Runtime};
use docket_config::StoreConfig;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

/// Pops due ids until one still refers to a pending document, claims it and
/// returns the rewritten document. Unknown document fields survive the
/// decode/encode round trip.
const CLAIM_SCRIPT: &str = r"
for _ = 1, 32 do
    local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
    if #ids == 0 then
        return false
    end
    local id = ids[1]
    redis.call('ZREM', KEYS[1], id)
    local raw = redis.call('GET', ARGV[3] .. id)
    if raw then
        local doc = cjson.decode(raw)
        if doc['status'] == 'Pending' then
            doc['status'] = 'Processing'
            doc['processing_started_at'] = ARGV[2]
            local encoded = cjson.encode(doc)
            redis.call('SET', ARGV[3] .. id, encoded)
            redis.call('ZADD', KEYS[2], ARGV[1], id)
            return encoded
        end
    end
end
return false
";

/// Moves claims older than the cutoff back to pending. Claimed jobs were
/// already due, so the claim score doubles as their pending score.
const RECLAIM_SCRIPT: &str = r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', '(' .. ARGV[1])
local count = 0
for _, id in ipairs(ids) do
    local score = redis.call('ZSCORE', KEYS[2], id)
    redis.call('ZREM', KEYS[2], id)
    local raw = redis.call('GET', ARGV[2] .. id)
    if raw then
        local doc = cjson.decode(raw)
        if doc['status'] == 'Processing' then
            doc['status'] = 'Pending'
            doc['processing_started_at'] = nil
            redis.call('SET', ARGV[2] .. id, cjson.encode(doc))
            redis.call('ZADD', KEYS[1], score, id)
            count = count + 1
        end
    end
end
return count
";

/// Create a Redis connection pool.
pub async fn create_pool(config: &StoreConfig) -> JobResult<Pool> {
    info!(url = %config.url, "Creating Redis connection pool for job store...");

    let pool = Config::from_url(&config.url)
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {e}")))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for one job collection.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    namespace: String,
}

impl StoreKeys {
    /// Create a key builder for the given namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Prefix shared by every job document key.
    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.namespace)
    }

    /// Job document key.
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.namespace, job_id)
    }

    /// Pending index (sorted set by scheduled time).
    pub fn pending(&self) -> String {
        format!("{}:pending", self.namespace)
    }

    /// Processing index (sorted set by claim time).
    pub fn processing(&self) -> String {
        format!("{}:processing", self.namespace)
    }
}

/// Redis-backed job store.
pub struct RedisJobStore {
    pool: Pool,
    keys: StoreKeys,
    claim_script: Script,
    reclaim_script: Script,
}

impl RedisJobStore {
    /// Create a store over an existing pool.
    pub fn new(pool: Pool, config: &StoreConfig) -> Self {
        Self::with_namespace(pool, config.namespace())
    }

    /// Create a store using an explicit key namespace.
    pub fn with_namespace(pool: Pool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            keys: StoreKeys::new(namespace),
            claim_script: Script::new(CLAIM_SCRIPT),
            reclaim_script: Script::new(RECLAIM_SCRIPT),
        }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// Writes the document and puts its id in the index matching its status.
    async fn write(&self, job: &JobRecord) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let id = job.id.as_str();
        let json = job.to_json()?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.keys.job(id), json)
            .ignore()
            .zrem(self.keys.pending(), id)
            .ignore()
            .zrem(self.keys.processing(), id)
            .ignore();

        match job.status {
            JobStatus::Pending => {
                pipe.zadd(self.keys.pending(), id, job.scheduled_at.timestamp_millis())
                    .ignore();
            }
            JobStatus::Processing => {
                let started = job.processing_started_at.unwrap_or(job.scheduled_at);
                pipe.zadd(self.keys.processing(), id, started.timestamp_millis())
                    .ignore();
            }
            JobStatus::Completed | JobStatus::Failed => {}
        }

        let _: () = pipe.query_async(&mut *conn).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert(&self, job: &JobRecord) -> JobResult<JobId> {
        self.write(job).await?;
        debug!(job_id = %job.id, job_type = %job.job_type, "Inserted job");
        Ok(job.id.clone())
    }

    async fn claim_next_due(&self, now: DateTime<Utc>) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;

        let claimed: Option<String> = self
            .claim_script
            .key(self.keys.pending())
            .key(self.keys.processing())
            .arg(now.timestamp_millis())
            .arg(now.to_rfc3339_opts(SecondsFormat::Micros, true))
            .arg(self.keys.job_prefix())
            .invoke_async(&mut *conn)
            .await?;

        match claimed {
            Some(json) => {
                let job = JobRecord::from_json(&json)
                    .map_err(|e| JobError::Store(format!("Claimed document is unreadable: {e}")))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, job: &JobRecord) -> JobResult<()> {
        self.write(job).await
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> JobResult<u64> {
        let mut conn = self.conn().await?;

        let count: u64 = self
            .reclaim_script
            .key(self.keys.pending())
            .key(self.keys.processing())
            .arg(cutoff.timestamp_millis())
            .arg(self.keys.job_prefix())
            .invoke_async(&mut *conn)
            .await?;

        Ok(count)
    }

    async fn get(&self, id: &JobId) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.get(self.keys.job(id.as_str())).await?;

        match json {
            Some(json) => match JobRecord::from_json(&json) {
                Ok(job) => Ok(Some(job)),
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Stored job document is unreadable");
                    Err(e.into())
                }
            },
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}
