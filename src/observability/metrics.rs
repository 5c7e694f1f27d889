//! HTTP request metrics backed by OpenTelemetry or the Prometheus client.
//!
//! Key metrics:
//! - http_requests_total: Counter for all requests
//! - http_requests_by_method_total: Counter labelled by method and status
//! - http_active_connections: Gauge for in-flight requests
//! - http_request_duration_seconds: Histogram for handler latency
//! - http_response_size_bytes: Histogram for response body size
//! - business_metric_value: Gauge labelled by an arbitrary `type`
//!
//! The registry is built once in `main` and shared as `Arc<Metrics>`.
//! Every mutator is infallible and safe to call on [`Metrics::noop`], so
//! handlers never depend on the exporter having come up.

use opentelemetry::metrics::{Counter, Histogram, MeterProvider as _, ObservableGauge};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::runtime;
use parking_lot::{Mutex, RwLock};
use prometheus::{
    exponential_buckets, Gauge, GaugeVec, HistogramOpts, IntCounter, IntCounterVec, Opts,
    Registry,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::telemetry::{resource, shutdown_blocking};
use crate::config::{Config, MetricsBackend};
use crate::error::TelemetryError;

/// Instrumentation scope for OTLP instruments.
pub const METER_NAME: &str = "dm-nkp-gitops-custom-app/metrics";

/// Interval between OTLP metric exports.
pub const EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Business gauge seeded on initialization.
const DEMO_BUSINESS_METRIC: (&str, f64) = ("demo", 42.0);

/// An `f64` cell that can be read from an observable gauge callback.
#[derive(Debug, Default)]
struct GaugeValue(AtomicU64);

impl GaugeValue {
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

type BusinessValues = Arc<RwLock<HashMap<String, f64>>>;

/// OpenTelemetry instruments. Gauges are observed at collection time.
struct OtlpInstruments {
    provider: SdkMeterProvider,
    requests_total: Counter<u64>,
    requests_by_method: Counter<u64>,
    request_duration: Histogram<f64>,
    response_size: Histogram<u64>,
    // Held so the callbacks stay registered for the provider's lifetime.
    _active_connections: ObservableGauge<f64>,
    _business_metric: ObservableGauge<f64>,
}

/// Prometheus client instruments registered on a private registry.
struct PrometheusInstruments {
    registry: Registry,
    requests_total: IntCounter,
    requests_by_method: IntCounterVec,
    active_connections: Gauge,
    request_duration: prometheus::Histogram,
    response_size: prometheus::Histogram,
    business_metric: GaugeVec,
}

enum Backend {
    Noop,
    Otlp(Box<OtlpInstruments>),
    Prometheus(Box<PrometheusInstruments>),
}

/// Request metrics registry.
pub struct Metrics {
    backend: Backend,
    active_connections: Arc<GaugeValue>,
    business_values: BusinessValues,
    // Held while the gauge is written so counts and stores stay ordered.
    in_flight: Mutex<i64>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("backend", &self.backend_name())
            .field("active_connections", &self.active_connections.get())
            .field("in_flight", &*self.in_flight.lock())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Registry with no exporter behind it.
    ///
    /// Mutators only update local storage. Used when initialization failed
    /// or has not happened yet.
    pub fn noop() -> Self {
        Self {
            backend: Backend::Noop,
            active_connections: Arc::default(),
            business_values: BusinessValues::default(),
            in_flight: Mutex::new(0),
        }
    }

    /// Initialize the metrics pipeline selected by `config`.
    ///
    /// For OTLP this builds a periodic exporter against the collector and
    /// registers it as the global meter provider.
    pub fn init(config: &Config) -> Result<Self, TelemetryError> {
        match config.metrics_backend {
            MetricsBackend::Otlp => {
                use opentelemetry_otlp::{Protocol, WithExportConfig};

                let endpoint = config.collector_url();
                let exporter = opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint.clone())
                    .with_protocol(Protocol::Grpc);

                let provider = opentelemetry_otlp::new_pipeline()
                    .metrics(runtime::Tokio)
                    .with_exporter(exporter)
                    .with_resource(resource(&config.service_name))
                    .with_period(EXPORT_INTERVAL)
                    .build()?;

                opentelemetry::global::set_meter_provider(provider.clone());
                tracing::info!(%endpoint, "OTLP metrics exporter configured");
                Ok(Self::otlp(provider))
            }
            MetricsBackend::Prometheus => {
                let metrics = Self::prometheus(Registry::new())?;
                tracing::info!(port = ?config.metrics_port, "Prometheus metrics registry configured");
                Ok(metrics)
            }
        }
    }

    /// Build OTLP instruments on an existing meter provider.
    pub fn otlp(provider: SdkMeterProvider) -> Self {
        let meter = provider.meter(METER_NAME);
        let active_connections = Arc::new(GaugeValue::default());
        let business_values = BusinessValues::default();

        let active = Arc::clone(&active_connections);
        let business = Arc::clone(&business_values);

        let instruments = OtlpInstruments {
            requests_total: meter
                .u64_counter("http_requests_total")
                .with_description("Total number of HTTP requests")
                .with_unit("1")
                .init(),
            requests_by_method: meter
                .u64_counter("http_requests_by_method_total")
                .with_description("Total number of HTTP requests by method")
                .with_unit("1")
                .init(),
            request_duration: meter
                .f64_histogram("http_request_duration_seconds")
                .with_description("HTTP request duration in seconds")
                .with_unit("s")
                .init(),
            response_size: meter
                .u64_histogram("http_response_size_bytes")
                .with_description("HTTP response size in bytes")
                .with_unit("By")
                .init(),
            _active_connections: meter
                .f64_observable_gauge("http_active_connections")
                .with_description("Current number of active HTTP connections")
                .with_callback(move |observer| observer.observe(active.get(), &[]))
                .init(),
            _business_metric: meter
                .f64_observable_gauge("business_metric_value")
                .with_description("A custom business metric value")
                .with_callback(move |observer| {
                    let values = business.read();
                    for (kind, value) in values.iter() {
                        observer.observe(*value, &[KeyValue::new("type", kind.clone())]);
                    }
                })
                .init(),
            provider,
        };

        Self {
            backend: Backend::Otlp(Box::new(instruments)),
            active_connections,
            business_values,
            in_flight: Mutex::new(0),
        }
        .seeded()
    }

    /// Build Prometheus instruments and register them on `registry`.
    pub fn prometheus(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total =
            IntCounter::new("http_requests_total", "Total number of HTTP requests")?;
        registry.register(Box::new(requests_total.clone()))?;

        let requests_by_method = IntCounterVec::new(
            Opts::new(
                "http_requests_by_method_total",
                "Total number of HTTP requests by method",
            ),
            &["method", "status"],
        )?;
        registry.register(Box::new(requests_by_method.clone()))?;

        let active_connections = Gauge::new(
            "http_active_connections",
            "Current number of active HTTP connections",
        )?;
        registry.register(Box::new(active_connections.clone()))?;

        let request_duration = prometheus::Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ))?;
        registry.register(Box::new(request_duration.clone()))?;

        let response_size = prometheus::Histogram::with_opts(
            HistogramOpts::new("http_response_size_bytes", "HTTP response size in bytes")
                .buckets(exponential_buckets(64.0, 4.0, 8)?),
        )?;
        registry.register(Box::new(response_size.clone()))?;

        let business_metric = GaugeVec::new(
            Opts::new("business_metric_value", "A custom business metric value"),
            &["type"],
        )?;
        registry.register(Box::new(business_metric.clone()))?;

        let instruments = PrometheusInstruments {
            registry,
            requests_total,
            requests_by_method,
            active_connections,
            request_duration,
            response_size,
            business_metric,
        };

        Ok(Self {
            backend: Backend::Prometheus(Box::new(instruments)),
            active_connections: Arc::default(),
            business_values: BusinessValues::default(),
            in_flight: Mutex::new(0),
        }
        .seeded())
    }

    fn seeded(self) -> Self {
        self.update_active_connections(0.0);
        self.update_business_metric(DEMO_BUSINESS_METRIC.0, DEMO_BUSINESS_METRIC.1);
        self
    }

    /// Short name of the active backend, for logs.
    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Noop => "noop",
            Backend::Otlp(_) => "otlp",
            Backend::Prometheus(_) => "prometheus",
        }
    }

    /// Prometheus registry to serve on `/metrics`, if that backend is active.
    pub fn registry(&self) -> Option<&Registry> {
        match &self.backend {
            Backend::Prometheus(p) => Some(&p.registry),
            _ => None,
        }
    }

    /// Add one to the unlabelled request counter.
    pub fn inc_request_counter(&self) {
        match &self.backend {
            Backend::Otlp(m) => m.requests_total.add(1, &[]),
            Backend::Prometheus(m) => m.requests_total.inc(),
            Backend::Noop => {}
        }
    }

    /// Add one to the request counter for the `(method, status)` pair.
    pub fn inc_request_counter_vec(&self, method: &str, status: &str) {
        match &self.backend {
            Backend::Otlp(m) => m.requests_by_method.add(
                1,
                &[
                    KeyValue::new("method", method.to_string()),
                    KeyValue::new("status", status.to_string()),
                ],
            ),
            Backend::Prometheus(m) => m
                .requests_by_method
                .with_label_values(&[method, status])
                .inc(),
            Backend::Noop => {}
        }
    }

    /// Set the active-connections gauge. Last write wins.
    pub fn update_active_connections(&self, count: f64) {
        self.active_connections.set(count);
        if let Backend::Prometheus(m) = &self.backend {
            m.active_connections.set(count);
        }
    }

    /// Record a request duration.
    pub fn update_request_duration(&self, duration: Duration) {
        let seconds = duration.as_secs_f64();
        match &self.backend {
            Backend::Otlp(m) => m.request_duration.record(seconds, &[]),
            Backend::Prometheus(m) => m.request_duration.observe(seconds),
            Backend::Noop => {}
        }
    }

    /// Record a response body size in bytes.
    pub fn update_response_size(&self, bytes: u64) {
        match &self.backend {
            Backend::Otlp(m) => m.response_size.record(bytes, &[]),
            Backend::Prometheus(m) => m.response_size.observe(bytes as f64),
            Backend::Noop => {}
        }
    }

    /// Set or create the business gauge for `kind`.
    pub fn update_business_metric(&self, kind: &str, value: f64) {
        {
            let mut values = self.business_values.write();
            match values.get_mut(kind) {
                Some(slot) => *slot = value,
                None => {
                    values.insert(kind.to_string(), value);
                }
            }
        }
        if let Backend::Prometheus(m) = &self.backend {
            m.business_metric.with_label_values(&[kind]).set(value);
        }
    }

    /// Latest value written to the active-connections gauge.
    pub fn active_connections(&self) -> f64 {
        self.active_connections.get()
    }

    /// Latest value written to the business gauge for `kind`.
    pub fn business_metric(&self, kind: &str) -> Option<f64> {
        self.business_values.read().get(kind).copied()
    }

    /// Track one in-flight request until the guard is dropped.
    ///
    /// The gauge is set to the number of live guards on entry and on exit,
    /// so a lone request reports 1 and then 0.
    pub fn track_connection(&self) -> ConnectionGuard<'_> {
        self.adjust_in_flight(1);
        ConnectionGuard { metrics: self }
    }

    fn adjust_in_flight(&self, delta: i64) {
        let mut in_flight = self.in_flight.lock();
        *in_flight += delta;
        self.update_active_connections(*in_flight as f64);
    }

    /// Flush pending measurements and shut down the exporter.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TelemetryError> {
        match &self.backend {
            Backend::Otlp(m) => {
                let provider = m.provider.clone();
                shutdown_blocking("metrics", timeout, move || provider.shutdown()).await
            }
            Backend::Prometheus(_) | Backend::Noop => Ok(()),
        }
    }
}

/// Marks one in-flight request. See [`Metrics::track_connection`].
#[must_use = "the connection is untracked as soon as the guard is dropped"]
pub struct ConnectionGuard<'a> {
    metrics: &'a Metrics,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.metrics.adjust_in_flight(-1);
    }
}
