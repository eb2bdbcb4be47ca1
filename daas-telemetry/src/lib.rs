//! Telemetry initialization for the DaaS control plane.
//!
//! Provides `tracing` setup with environment-appropriate output: structured
//! JSON logs to rotating files in production, pretty console logging in
//! development.

mod tracing;

pub use tracing::*;
