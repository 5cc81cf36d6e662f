//! Job types hosted by the server.

mod welcome_email;

pub use welcome_email::{SendWelcomeEmailJob, WelcomeEmail, SEND_WELCOME_EMAIL};

use docket_jobs::{ExecutorRegistry, JobResult, RecurringJob};

/// Register every executor the server knows about.
pub fn register_executors(registry: &ExecutorRegistry) {
    registry.register(SEND_WELCOME_EMAIL, SendWelcomeEmailJob::new);
}

/// Recurring table: the welcome e-mail job daily at 03:00 UTC.
pub fn recurring_jobs() -> JobResult<Vec<RecurringJob>> {
    Ok(vec![RecurringJob::new("0 3 * * *", SEND_WELCOME_EMAIL)?])
}
