//! # Docket Server Library
//!
//! Job types, HTTP endpoints and startup wiring for the Docket server.

pub mod jobs;
pub mod rest;
pub mod startup;
