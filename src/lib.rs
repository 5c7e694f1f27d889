//! dm-nkp-gitops-custom-app: a demo HTTP service instrumented with OpenTelemetry.
//!
//! Serves `/`, `/health` and `/ready`, and shows how to wire the three
//! telemetry pillars into an axum service for a GitOps deployment.
//!
//! # Architecture
//!
//! - **Best-effort observability**: logger, tracer and metrics start
//!   independently; a pillar that fails is disabled, the server still runs
//! - **Two metrics variants**: OTLP push (default) or a Prometheus scrape
//!   endpoint on a second listener
//! - **Ordered teardown**: server, then metrics, then tracer, then logger
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`error`]: Error types
//! - [`handlers`]: Route handlers and router
//! - [`observability`]: Metrics, tracing and logging setup
//! - [`server`]: HTTP server lifecycle

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // observability::metrics::Metrics is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::cast_precision_loss      // Gauge values are small counts
)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod server;

/// Version reported in responses and the telemetry resource.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Deadline for the whole shutdown sequence.
pub const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
