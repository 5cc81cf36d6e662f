//! # Docket Config
//!
//! Configuration management for the Docket job queue.
//! Supports layered configuration from TOML files and `DOCKET_`-prefixed
//! environment variables.

mod app_config;
mod error;
mod loader;

pub use app_config::*;
pub use error::*;
pub use loader::*;
