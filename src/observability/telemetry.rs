//! OpenTelemetry tracing and logging setup.
//!
//! Configures structured logging with:
//! - Console output via `tracing-subscriber` (always on)
//! - OTLP span export through `tracing-opentelemetry`
//! - OTLP log export through the tracing log bridge
//! - W3C Trace Context and Baggage propagation
//!
//! Each pillar is initialized independently. A pillar that fails to come up
//! is reported as a warning and left disabled; the service keeps running.

use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::logs::LoggerProvider;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{self as sdktrace, BatchConfigBuilder, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use std::time::Duration;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Config;
use crate::error::TelemetryError;
use crate::SERVICE_VERSION;

/// Instrumentation scope for spans created by the service.
pub const TRACER_NAME: &str = "dm-nkp-gitops-custom-app/server";

/// How long the span batch processor waits before exporting.
const TRACE_BATCH_DELAY: Duration = Duration::from_secs(5);

/// Crates whose events must not reach the OTLP log exporter. Their logs are
/// emitted while exporting and would loop back into the pipeline.
const EXPORTER_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "tonic", "tower", "opentelemetry"];

/// Resource descriptor shared by every pillar.
pub fn resource(service_name: &str) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", SERVICE_VERSION),
    ])
}

/// Run a blocking provider shutdown off the async runtime, bounded by `timeout`.
pub(crate) async fn shutdown_blocking<F, E>(
    pillar: &'static str,
    timeout: Duration,
    shutdown: F,
) -> Result<(), TelemetryError>
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Into<TelemetryError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(shutdown)).await {
        Ok(joined) => joined?.map_err(Into::into),
        Err(_) => Err(TelemetryError::ShutdownTimeout { pillar, timeout }),
    }
}

/// Build the OTLP log pipeline.
///
/// Returns `Ok(None)` when OTLP logging is disabled via `OTEL_LOGS_ENABLED`.
pub fn init_logger(config: &Config) -> Result<Option<LoggerProvider>, TelemetryError> {
    if !config.logs_enabled {
        return Ok(None);
    }

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(config.collector_url())
        .with_protocol(Protocol::Grpc);

    let provider = opentelemetry_otlp::new_pipeline()
        .logging()
        .with_resource(resource(&config.service_name))
        .with_exporter(exporter)
        .install_batch(runtime::Tokio)?;

    Ok(Some(provider))
}

/// Build the OTLP trace pipeline and register it globally.
///
/// Every span is sampled. The W3C Trace Context and Baggage propagators are
/// installed alongside the provider.
pub fn init_tracer(config: &Config) -> Result<TracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(config.collector_url())
        .with_protocol(Protocol::Grpc);

    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            sdktrace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_resource(resource(&config.service_name)),
        )
        .with_batch_config(
            BatchConfigBuilder::default()
                .with_scheduled_delay(TRACE_BATCH_DELAY)
                .build(),
        )
        .install_batch(runtime::Tokio)?;

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider)
}

/// Active telemetry pillars for the process.
#[derive(Default)]
pub struct Telemetry {
    logger: Option<LoggerProvider>,
    tracer: Option<TracerProvider>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("logs_active", &self.logs_active())
            .field("traces_active", &self.traces_active())
            .finish()
    }
}

impl Telemetry {
    /// Initialize logging and tracing, then install the global subscriber.
    ///
    /// Failures are logged once the console layer is in place and never
    /// abort startup.
    pub fn init(config: &Config) -> Self {
        let mut failures = Vec::new();

        let logger = init_logger(config).unwrap_or_else(|e| {
            failures.push(("logger", e));
            None
        });
        let tracer = match init_tracer(config) {
            Ok(provider) => Some(provider),
            Err(e) => {
                failures.push(("tracer", e));
                None
            }
        };

        let telemetry = Self { logger, tracer };
        if let Err(e) = telemetry.install_subscriber(&config.log_level) {
            eprintln!("failed to install tracing subscriber: {e}");
        }

        tracing::info!(
            service = %config.service_name,
            endpoint = %config.otel_endpoint,
            otlp_logs = telemetry.logs_active(),
            otlp_traces = telemetry.traces_active(),
            "OpenTelemetry telemetry initialized"
        );
        if !config.logs_enabled {
            tracing::info!("OTLP logging disabled via OTEL_LOGS_ENABLED, using stdout only");
        }
        for (pillar, error) in failures {
            tracing::warn!(pillar, error = %error, "Failed to initialize telemetry pillar, continuing without it");
        }

        telemetry
    }

    fn install_subscriber(&self, log_level: &str) -> Result<(), TelemetryError> {
        let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        let trace_layer = self
            .tracer
            .as_ref()
            .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(TRACER_NAME)));

        let log_layer = self.logger.as_ref().map(|provider| {
            let targets = EXPORTER_TARGETS
                .iter()
                .fold(Targets::new().with_default(LevelFilter::INFO), |targets, target| {
                    targets.with_target(*target, LevelFilter::OFF)
                });
            OpenTelemetryTracingBridge::new(provider).with_filter(targets)
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .with(trace_layer)
            .with(log_layer)
            .try_init()?;

        Ok(())
    }

    /// Whether spans are exported over OTLP.
    pub fn traces_active(&self) -> bool {
        self.tracer.is_some()
    }

    /// Whether log events are exported over OTLP.
    pub fn logs_active(&self) -> bool {
        self.logger.is_some()
    }

    /// Flush pending spans and shut down the trace exporter.
    pub async fn shutdown_tracer(&self, timeout: Duration) -> Result<(), TelemetryError> {
        match &self.tracer {
            Some(provider) => {
                let provider = provider.clone();
                shutdown_blocking("tracer", timeout, move || provider.shutdown()).await
            }
            None => Ok(()),
        }
    }

    /// Flush pending log records and shut down the log exporter.
    pub async fn shutdown_logger(&self, timeout: Duration) -> Result<(), TelemetryError> {
        match &self.logger {
            Some(provider) => {
                let provider = provider.clone();
                shutdown_blocking("logger", timeout, move || provider.shutdown()).await
            }
            None => Ok(()),
        }
    }
}

/// Initialize tracing for tests (only logs errors).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::Key;

    fn offline_config() -> Config {
        Config {
            otel_endpoint: "127.0.0.1:1".into(),
            ..Config::default()
        }
    }

    #[test]
    fn test_resource_carries_service_identity() {
        let resource = resource("checkout");
        assert_eq!(
            resource.get(Key::new("service.name")).map(|v| v.to_string()),
            Some("checkout".to_string())
        );
        assert_eq!(
            resource.get(Key::new("service.version")).map(|v| v.to_string()),
            Some("0.1.0".to_string())
        );
    }

    #[test]
    fn test_logger_disabled_returns_none() {
        let config = Config {
            logs_enabled: false,
            ..offline_config()
        };
        assert!(init_logger(&config).unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tracer_builds_without_collector() {
        // The exporter connects lazily, so an unreachable collector is fine.
        let provider = init_tracer(&offline_config()).expect("tracer pipeline");
        let telemetry = Telemetry {
            logger: None,
            tracer: Some(provider),
        };
        assert!(telemetry.traces_active());
        let _ = telemetry.shutdown_tracer(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_inactive_pillars_shut_down_cleanly() {
        let telemetry = Telemetry::default();
        assert!(!telemetry.traces_active());
        assert!(!telemetry.logs_active());
        assert!(telemetry.shutdown_tracer(Duration::from_secs(1)).await.is_ok());
        assert!(telemetry.shutdown_logger(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_blocking_times_out() {
        let result = shutdown_blocking("slow", Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok::<(), TelemetryError>(())
        })
        .await;
        assert!(matches!(
            result,
            Err(TelemetryError::ShutdownTimeout { pillar: "slow", .. })
        ));
    }
}
