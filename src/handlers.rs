//! HTTP request handlers.
//!
//! Routes:
//! - `/` - greeting with the service name and version
//! - `/health` - liveness probe, always healthy
//! - `/ready` - readiness probe, always ready
//!
//! Any method is accepted. Method and path only feed metric labels and span
//! attributes.

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{field, info, info_span, Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::observability::metrics::Metrics;
use crate::SERVICE_VERSION;

/// Body returned by `/health`.
pub const HEALTH_BODY: &str = r#"{"status": "healthy"}"#;

/// Body returned by `/ready`.
pub const READY_BODY: &str = r#"{"status": "ready"}"#;

/// Simulated work in the root handler.
const ROOT_PROCESSING_DELAY: Duration = Duration::from_millis(10);

/// Simulated check time in the probe handlers.
const PROBE_CHECK_DELAY: Duration = Duration::from_millis(5);

/// Upper bound on handling one request before answering 408.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// State shared by the application handlers.
#[derive(Clone)]
pub struct AppState {
    metrics: Arc<Metrics>,
    root_body: Bytes,
}

impl AppState {
    /// Create handler state for `service_name` recording into `metrics`.
    pub fn new(service_name: &str, metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            root_body: Bytes::from(root_body(service_name)),
        }
    }

    /// The metrics registry handlers record into.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Body returned by `/` for `service_name`.
///
/// ```
/// let body = dm_nkp_gitops_custom_app::handlers::root_body("demo");
/// assert_eq!(body, r#"{"message": "Hello from demo", "version": "0.1.0"}"#);
/// ```
pub fn root_body(service_name: &str) -> String {
    // Display on a JSON string value yields the quoted, escaped literal.
    let message = serde_json::Value::String(format!("Hello from {service_name}"));
    format!(r#"{{"message": {message}, "version": "{SERVICE_VERSION}"}}"#)
}

/// Create the application router with request tracing.
pub fn create_router(state: AppState) -> Router {
    create_router_with_timeout(state, REQUEST_TIMEOUT)
}

/// Create the application router, answering 408 after `timeout`.
pub fn create_router_with_timeout(state: AppState, timeout: Duration) -> Router {
    Router::new()
        .route("/", any(root_handler))
        .route("/health", any(health_handler))
        .route("/ready", any(ready_handler))
        .layer(TimeoutLayer::new(timeout))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_request_span)
                .on_response(record_response),
        )
        .with_state(state)
}

/// Read-only view of request headers for the global text map propagator.
struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Server span for one request, named `"<METHOD> <path>"`.
///
/// An incoming `traceparent` makes the span a child of the caller's trace.
/// Fields left empty are filled in by the handlers and [`record_response`].
fn make_request_span(request: &Request<Body>) -> Span {
    let method = request.method();
    let path = request.uri().path();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    let span = info_span!(
        "http.request",
        otel.name = %format!("{method} {path}"),
        otel.kind = "server",
        http.method = %method,
        http.url = %request.uri(),
        http.route = path,
        user_agent,
        http.client_ip = %client_ip,
        http.status_code = field::Empty,
        http.response.size = field::Empty,
        http.request.duration_ms = field::Empty,
        http.request.success = field::Empty,
    );

    let parent = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(request.headers()))
    });
    span.set_parent(parent);
    span
}

fn record_response(response: &Response, latency: Duration, span: &Span) {
    let status = response.status().as_u16();
    let latency_ms = latency.as_secs_f64() * 1000.0;
    span.record("http.status_code", status);
    span.record("http.request.duration_ms", latency_ms);
    tracing::debug!(status, latency_ms, "Response sent");
}

fn json_response(body: Bytes) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// Handle `/` - greeting, with metrics and nested spans.
async fn root_handler(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let start = Instant::now();
    let request_span = Span::current();
    let process_span = info_span!(
        "process.request",
        operation = "root_handler",
        handler.type = "root",
        processing.duration_ms = field::Empty,
    );

    async move {
        info!(method = %method, path = uri.path(), "Received request");

        let metrics = state.metrics();
        metrics.inc_request_counter();
        metrics.inc_request_counter_vec(method.as_str(), StatusCode::OK.as_str());
        let connection = metrics.track_connection();

        async {
            info!("Processing business logic for root endpoint");
            tokio::time::sleep(ROOT_PROCESSING_DELAY).await;
        }
        .instrument(info_span!(
            "business.logic",
            business.operation = "generate_response"
        ))
        .await;

        let body = state.root_body.clone();
        let response_size = body.len();
        let elapsed = start.elapsed();
        metrics.update_request_duration(elapsed);
        metrics.update_response_size(response_size as u64);
        drop(connection);

        let duration_ms = elapsed.as_secs_f64() * 1000.0;
        request_span.record("http.response.size", response_size as u64);
        request_span.record("http.request.success", true);
        Span::current().record("processing.duration_ms", duration_ms);
        info!(
            status = StatusCode::OK.as_u16(),
            duration_ms,
            response_size,
            "Request completed"
        );

        json_response(body)
    }
    .instrument(process_span)
    .await
}

/// Handle `/health` - liveness probe.
async fn health_handler() -> Response {
    async {
        info!(check_type = "liveness", "Health check requested");
        run_checks("application", "healthy")
            .instrument(info_span!(
                "health.checks.run",
                check.component = "application",
                check.status = true
            ))
            .await;
        info!(status = "healthy", "Health check completed");
        json_response(Bytes::from_static(HEALTH_BODY.as_bytes()))
    }
    .instrument(info_span!(
        "health.check",
        check.type = "liveness",
        endpoint = "/health"
    ))
    .await
}

/// Handle `/ready` - readiness probe.
async fn ready_handler() -> Response {
    async {
        info!(check_type = "readiness", "Readiness check requested");
        run_checks("metrics", "ready")
            .instrument(info_span!(
                "readiness.checks.run",
                check.component = "metrics",
                check.status = true
            ))
            .await;
        info!(status = "ready", "Readiness check completed");
        json_response(Bytes::from_static(READY_BODY.as_bytes()))
    }
    .instrument(info_span!(
        "readiness.check",
        check.type = "readiness",
        endpoint = "/ready"
    ))
    .await
}

async fn run_checks(component: &'static str, status: &'static str) {
    info!(component, status, "Running checks");
    tokio::time::sleep(PROBE_CHECK_DELAY).await;
}
