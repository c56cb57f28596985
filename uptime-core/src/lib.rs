//! Probe scheduler, failure-state machine, and telemetry aggregation for
//! the uptime monitoring service.
//!
//! This crate is the core described by the specification: everything
//! outside authentication, request validation, HTTP framing, and
//! persistence technology. [`UptimeService`] is the facade the HTTP layer
//! (the `uptime-api` binary) drives; every operation named there
//! corresponds to one method here.

pub mod config;
pub mod error;
pub mod model;
pub mod probe;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod transition;

pub use error::{Result, UptimeError};
pub use service::UptimeService;
