//! Application state for Axum handlers.

use docket_jobs::{JobEnqueuer, JobStore};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Enqueues jobs on behalf of request handlers.
    pub enqueuer: JobEnqueuer,
    /// Backing store, used for health checks.
    pub store: Arc<dyn JobStore>,
}

impl AppState {
    /// Creates a new application state over `store`.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            enqueuer: JobEnqueuer::new(store.clone()),
            store,
        }
    }
}
