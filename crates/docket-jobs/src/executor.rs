//! Executor contract and job-type registry.

use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Work performed for one job type.
///
/// A fresh executor is built for every execution attempt, so implementations
/// may keep per-attempt state. `cancel` fires on process shutdown; long
/// running executors should observe it and return [`JobError::Cancelled`].
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run one attempt against the stored payload.
    async fn execute(&self, payload: Option<&str>, cancel: &CancellationToken) -> JobResult<()>;
}

/// Builds an executor for one attempt. Dependencies are captured when the
/// factory is registered.
pub type ExecutorFactory = Arc<dyn Fn() -> Box<dyn JobExecutor> + Send + Sync>;

/// Maps stable job-type identifiers to executor factories.
#[derive(Default)]
pub struct ExecutorRegistry {
    factories: RwLock<HashMap<String, ExecutorFactory>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `job_type`, replacing any previous one.
    pub fn register<E, F>(&self, job_type: impl Into<String>, factory: F)
    where
        E: JobExecutor + 'static,
        F: Fn() -> E + Send + Sync + 'static,
    {
        let job_type = job_type.into();
        let factory: ExecutorFactory = Arc::new(move || Box::new(factory()) as Box<dyn JobExecutor>);

        if self.factories.write().insert(job_type.clone(), factory).is_some() {
            warn!(job_type = %job_type, "Replaced existing executor registration");
        } else {
            info!(job_type = %job_type, "Registered job executor");
        }
    }

    /// Build a fresh executor for `job_type`.
    pub fn resolve(&self, job_type: &str) -> JobResult<Box<dyn JobExecutor>> {
        let factory = self
            .factories
            .read()
            .get(job_type)
            .cloned()
            .ok_or_else(|| JobError::UnknownJobType(job_type.to_string()))?;

        Ok(factory())
    }

    /// Returns true if `job_type` has a registered factory.
    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.read().contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

/// Decode a JSON payload into the executor's input type.
pub fn decode_payload<T: DeserializeOwned>(payload: Option<&str>) -> JobResult<T> {
    let payload = payload.ok_or_else(|| JobError::InvalidPayload("payload is missing".to_string()))?;
    serde_json::from_str(payload).map_err(|e| JobError::InvalidPayload(e.to_string()))
}
