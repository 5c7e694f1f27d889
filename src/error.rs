//! Error types for configuration, telemetry and the HTTP server.
//!
//! Three classes of failure exist:
//! - Fatal: [`ConfigError`] and [`ServerError::Bind`] abort startup
//! - Degraded: [`TelemetryError`] is logged and the pillar falls back to a no-op
//! - Shutdown: errors from teardown steps are logged, never fatal

use std::io;
use std::time::Duration;

/// Errors raised while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A port value could not be parsed.
    #[error("invalid value {value:?} for {key}: expected a port number")]
    InvalidPort { key: &'static str, value: String },

    /// The metrics backend name is not recognised.
    #[error("unknown metrics backend {0:?} (expected \"otlp\" or \"prometheus\")")]
    UnknownBackend(String),
}

/// Errors raised while setting up or tearing down a telemetry pillar.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("trace pipeline: {0}")]
    Trace(#[from] opentelemetry::trace::TraceError),

    #[error("metrics pipeline: {0}")]
    Metrics(#[from] opentelemetry::metrics::MetricsError),

    #[error("log pipeline: {0}")]
    Logs(#[from] opentelemetry::logs::LogError),

    #[error("prometheus registry: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    /// Flushing a provider did not finish before the shutdown deadline.
    #[error("{pillar} shutdown did not complete within {timeout:?}")]
    ShutdownTimeout {
        pillar: &'static str,
        timeout: Duration,
    },

    #[error("shutdown task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors raised by the HTTP server wrapper.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound. Fatal at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] io::Error),

    #[error("server already started")]
    AlreadyStarted,

    /// In-flight requests were still running when the deadline passed.
    #[error("{listener} listener did not drain within {deadline:?}")]
    ShutdownTimeout {
        listener: &'static str,
        deadline: Duration,
    },
}
