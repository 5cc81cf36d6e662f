//! Welcome e-mail delivery job.

use async_trait::async_trait;
use docket_jobs::{decode_payload, CancellationToken, JobError, JobExecutor, JobResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Job type identifier.
pub const SEND_WELCOME_EMAIL: &str = "send_welcome_email";

/// Simulated delivery latency.
const DELIVERY_DELAY: Duration = Duration::from_secs(3);

/// Payload of a welcome e-mail job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeEmail {
    /// Recipient address.
    pub email: String,
    /// Name used in the greeting.
    pub name: String,
}

/// Sends the welcome e-mail.
#[derive(Debug, Clone)]
pub struct SendWelcomeEmailJob {
    delivery_delay: Duration,
}

impl SendWelcomeEmailJob {
    pub fn new() -> Self {
        Self {
            delivery_delay: DELIVERY_DELAY,
        }
    }

    /// Override the simulated delivery latency.
    #[must_use]
    pub fn with_delivery_delay(mut self, delay: Duration) -> Self {
        self.delivery_delay = delay;
        self
    }
}

impl Default for SendWelcomeEmailJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobExecutor for SendWelcomeEmailJob {
    async fn execute(&self, payload: Option<&str>, cancel: &CancellationToken) -> JobResult<()> {
        let message: WelcomeEmail = decode_payload(payload)?;

        info!(email = %message.email, "Sending welcome email...");

        tokio::select! {
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            _ = tokio::time::sleep(self.delivery_delay) => {}
        }

        info!(email = %message.email, name = %message.name, "Welcome email sent");
        Ok(())
    }
}
