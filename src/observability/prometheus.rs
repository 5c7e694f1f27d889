//! Prometheus HTTP endpoint for metrics scraping.
//!
//! Served on the metrics port when the Prometheus backend is selected:
//! - `/metrics` - Prometheus text exposition format

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus endpoint state.
#[derive(Clone)]
pub struct PrometheusState {
    registry: Arc<Registry>,
}

impl PrometheusState {
    /// Create a new Prometheus state with the given registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

/// Create the Prometheus HTTP router.
pub fn create_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(PrometheusState::new(registry))
}

/// Handle GET /metrics - Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<PrometheusState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                format!("Failed to encode metrics: {e}").into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::Metrics;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_instruments() {
        let metrics = Metrics::prometheus(Registry::new()).unwrap();
        metrics.inc_request_counter();
        metrics.inc_request_counter_vec("GET", "200");

        let app = create_router(metrics.registry().unwrap().clone());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain; version=0.0.4"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("http_requests_total 1"));
        assert!(text.contains(r#"http_requests_by_method_total{method="GET",status="200"} 1"#));
        assert!(text.contains(r#"business_metric_value{type="demo"} 42"#));
    }

    #[tokio::test]
    async fn test_empty_registry_is_ok() {
        let app = create_router(Registry::new());

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
