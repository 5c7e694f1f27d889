//! OpenTelemetry and Prometheus observability infrastructure.
//!
//! Provides:
//! - Structured logging and tracing with OTLP export
//! - Request metrics on an OTLP or Prometheus backend
//! - HTTP endpoint for Prometheus scraping

pub mod metrics;
pub mod prometheus;
pub mod telemetry;
