//! E-mail job REST API controller.

use crate::jobs::{WelcomeEmail, SEND_WELCOME_EMAIL};
use crate::rest::responses::{ApiResult, AppError};
use crate::rest::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Create the e-mail router.
pub fn router() -> Router<AppState> {
    Router::new().route("/send-welcome-email", post(send_welcome_email))
}

/// Query parameters for the welcome e-mail request.
#[derive(Debug, Deserialize)]
pub struct SendWelcomeEmailParams {
    /// Recipient address.
    pub email: String,
    /// Recipient display name.
    #[serde(default)]
    pub name: String,
}

/// Response for an accepted job.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobAcceptedResponse {
    /// Confirmation naming the recipient.
    pub message: String,
    /// Identifier of the enqueued job.
    pub job_id: String,
}

/// Queue a welcome e-mail for delivery.
pub async fn send_welcome_email(
    State(state): State<AppState>,
    Query(params): Query<SendWelcomeEmailParams>,
) -> ApiResult<(StatusCode, Json<JobAcceptedResponse>)> {
    let email = params.email.trim();
    if email.is_empty() {
        return Err(AppError::BadRequest("email must not be empty".to_string()));
    }

    let payload = WelcomeEmail {
        email: email.to_string(),
        name: params.name,
    };
    let job_id = state.enqueuer.enqueue(SEND_WELCOME_EMAIL, Some(&payload)).await?;

    info!(job_id = %job_id, email = %payload.email, "Welcome email job queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAcceptedResponse {
            message: format!("Welcome email job queued for {}", payload.email),
            job_id: job_id.to_string(),
        }),
    ))
}
