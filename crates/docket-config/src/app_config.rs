//! Application configuration structures.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Job store connection configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Job processing settings.
    #[serde(default)]
    pub jobs: JobSettings,

    /// Recurring scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

impl AppConfig {
    /// Checks values that deserialize fine but cannot drive the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jobs.validate()?;

        if self.store.backend == StoreBackend::Redis && self.store.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.url is required for the redis backend".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".to_string()));
        }

        Ok(())
    }
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "docket".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Returns the bind address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub filter: Option<String>,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// Which store implementation backs the job collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance (multi-process deployments).
    #[default]
    Redis,
    /// Process-local store, lost on restart.
    Memory,
}

/// Job store connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL.
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Logical database name.
    #[serde(default = "default_database")]
    pub database: String,

    /// Collection holding the job documents.
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            pool_size: default_pool_size(),
            database: default_database(),
            collection: default_collection(),
        }
    }
}

impl StoreConfig {
    /// Key namespace shared by every document of the collection.
    #[must_use]
    pub fn namespace(&self) -> String {
        format!("{}:{}", self.database, self.collection)
    }
}

fn default_store_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_database() -> String {
    "docket".to_string()
}

fn default_collection() -> String {
    "jobs".to_string()
}

/// Job processing settings.
///
/// PascalCase aliases match the option names used by existing deployments
/// (`MaxRetries`, `StaleJobTimeoutMinutes`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Failed attempts allowed before a job is marked failed.
    #[serde(default = "default_max_retries", alias = "MaxRetries", alias = "maxretries")]
    pub max_retries: u32,

    /// Minutes after which a processing claim is considered abandoned.
    #[serde(
        default = "default_stale_timeout",
        alias = "StaleJobTimeoutMinutes",
        alias = "stalejobtimeoutminutes"
    )]
    pub stale_job_timeout_minutes: u64,

    /// Seconds between dispatcher polls.
    #[serde(
        default = "default_poll_interval",
        alias = "PollIntervalSeconds",
        alias = "pollintervalseconds"
    )]
    pub poll_interval_seconds: u64,

    /// Upper bound on concurrently executing jobs in this process.
    #[serde(
        default = "default_max_concurrent",
        alias = "MaxConcurrentJobs",
        alias = "maxconcurrentjobs"
    )]
    pub max_concurrent_jobs: usize,

    /// Re-run the stale-claim reaper every N minutes. Unset: startup only.
    #[serde(default)]
    pub reap_interval_minutes: Option<u64>,

    /// Mark jobs of unregistered types failed on the first attempt.
    #[serde(default)]
    pub fail_unknown_job_types: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            stale_job_timeout_minutes: default_stale_timeout(),
            poll_interval_seconds: default_poll_interval(),
            max_concurrent_jobs: default_max_concurrent(),
            reap_interval_minutes: None,
            fail_unknown_job_types: false,
        }
    }
}

impl JobSettings {
    /// Returns the poll interval as a Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Returns the staleness window as a Duration.
    #[must_use]
    pub const fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_job_timeout_minutes * 60)
    }

    /// Returns the periodic reap interval, if enabled.
    #[must_use]
    pub fn reap_interval(&self) -> Option<Duration> {
        self.reap_interval_minutes
            .filter(|m| *m > 0)
            .map(|m| Duration::from_secs(m * 60))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "jobs.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "jobs.poll_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.stale_job_timeout_minutes == 0 {
            return Err(ConfigError::Invalid(
                "jobs.stale_job_timeout_minutes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_stale_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    2
}

fn default_max_concurrent() -> usize {
    10
}

/// Recurring scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Run the recurring scheduler in this process.
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// Delay before the first evaluation.
    #[serde(default = "default_startup_delay")]
    pub startup_delay_seconds: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            startup_delay_seconds: default_startup_delay(),
        }
    }
}

impl SchedulerSettings {
    /// Returns the startup delay as a Duration.
    #[must_use]
    pub const fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_seconds)
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_startup_delay() -> u64 {
    10
}
