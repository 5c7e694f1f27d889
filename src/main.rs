//! dm-nkp-gitops-custom-app: demo HTTP service with OpenTelemetry wiring.
//!
//! # Usage
//!
//! ```bash
//! dm-nkp-gitops-custom-app --port 8080
//! ```
//!
//! Environment variables can also be used:
//! - `PORT`: Port to listen on (default 8080)
//! - `METRICS_PORT`: Prometheus scrape port (default 9090, prometheus backend only)
//! - `METRICS_BACKEND`: `otlp` (default) or `prometheus`
//! - `OTEL_SERVICE_NAME`: Service name for telemetry
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint (default otel-collector:4317)
//! - `OTEL_LOGS_ENABLED`: Export logs over OTLP (default true)
//! - `RUST_LOG`: Console log filter

use dm_nkp_gitops_custom_app::config::Config;
use dm_nkp_gitops_custom_app::observability::metrics::Metrics;
use dm_nkp_gitops_custom_app::observability::telemetry::Telemetry;
use dm_nkp_gitops_custom_app::server::Server;
use dm_nkp_gitops_custom_app::SHUTDOWN_TIMEOUT;
use std::sync::Arc;
use tokio::time::Instant;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config, metrics: &Metrics) {
    let version = env!("CARGO_PKG_VERSION");
    let metrics_line = match config.metrics_addr() {
        Some(addr) if metrics.registry().is_some() => format!("http://{addr}/metrics"),
        _ => format!("{} -> {}", metrics.backend_name(), config.otel_endpoint),
    };
    eprintln!(
        r#"
  {} v{}

  Configuration:
    Address:    {}
    Metrics:    {}
    Collector:  {}
    OTLP Logs:  {}

  Press Ctrl+C to shutdown gracefully.
"#,
        config.service_name,
        version,
        config.listen_addr(),
        metrics_line,
        config.otel_endpoint,
        config.logs_enabled,
    );
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl+c");
        tracing::info!("Received Ctrl+C, initiating shutdown...");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::load()?;

    // Logger and tracer first, so the metrics outcome is logged
    let telemetry = Telemetry::init(&config);

    let metrics = match Metrics::init(&config) {
        Ok(metrics) => {
            tracing::info!(backend = metrics.backend_name(), "Metrics initialized successfully");
            metrics
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to initialize metrics, instrumentation continues without export");
            Metrics::noop()
        }
    };
    let metrics = Arc::new(metrics);

    print_banner(&config, &metrics);

    let server = Arc::new(Server::new(&config, Arc::clone(&metrics)));
    tracing::info!(
        root = %format!("http://{}/", server.addr()),
        health = %format!("http://{}/health", server.addr()),
        ready = %format!("http://{}/ready", server.addr()),
        metrics = ?server.metrics_addr(),
        "Server endpoints"
    );

    // Serve on a background task; the main task waits for a signal
    let mut serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.start().await }
    });

    tokio::select! {
        result = &mut serving => {
            match result {
                Ok(Ok(())) => tracing::warn!("Server stopped before a shutdown signal"),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Server failed to start");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Server task panicked");
                    return Err(e.into());
                }
            }
        }
        () = shutdown_signal() => {}
    }

    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
    let remaining = || deadline.saturating_duration_since(Instant::now());

    tracing::info!("Shutting down HTTP server...");
    match server.shutdown(remaining()).await {
        Ok(()) => tracing::info!("HTTP server shutdown complete"),
        Err(e) => tracing::error!(error = %e, "Error shutting down server"),
    }

    tracing::info!("Shutting down telemetry components...");
    match metrics.shutdown(remaining()).await {
        Ok(()) => tracing::info!("Metrics shutdown complete"),
        Err(e) => tracing::warn!(error = %e, "Error shutting down metrics"),
    }
    match telemetry.shutdown_tracer(remaining()).await {
        Ok(()) => tracing::info!("Tracer shutdown complete"),
        Err(e) => tracing::warn!(error = %e, "Error shutting down tracer"),
    }
    tracing::info!("Shutting down logger");
    match telemetry.shutdown_logger(remaining()).await {
        Ok(()) => eprintln!("Logger shutdown complete"),
        Err(e) => eprintln!("Error shutting down logger: {e}"),
    }

    eprintln!("Server exited gracefully");
    Ok(())
}
