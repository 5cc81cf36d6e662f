//! HTTP entry points that enqueue jobs.

mod email_controller;
mod health_controller;
mod responses;
mod state;

pub use email_controller::{JobAcceptedResponse, SendWelcomeEmailParams};
pub use health_controller::HealthResponse;
pub use responses::{ApiResult, AppError, ErrorResponse, INTERNAL_ERROR_MESSAGE};
pub use state::AppState;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Creates the application router.
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health_controller::router())
        .nest("/api/email", email_controller::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Router created with email and health endpoints");
    router
}
