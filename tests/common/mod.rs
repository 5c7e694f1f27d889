//! Test utilities and server harness for integration tests.
//!
//! Provides:
//! - In-process test server on ephemeral ports
//! - URL helpers for the reqwest client

#![allow(dead_code)]

use dm_nkp_gitops_custom_app::config::{Config, MetricsBackend};
use dm_nkp_gitops_custom_app::error::ServerError;
use dm_nkp_gitops_custom_app::observability::metrics::Metrics;
use dm_nkp_gitops_custom_app::server::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Service name used by every test server.
pub const TEST_SERVICE_NAME: &str = "dm-nkp-gitops-custom-app";

/// An in-process server bound to 127.0.0.1 on ephemeral ports.
pub struct TestServer {
    pub server: Arc<Server>,
    pub metrics: Arc<Metrics>,
    pub addr: SocketAddr,
    pub metrics_addr: Option<SocketAddr>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Start a server with a no-op metrics registry.
    pub async fn start() -> Self {
        Self::start_with(test_config(), Arc::new(Metrics::noop())).await
    }

    /// Start a server with the Prometheus backend and its metrics listener.
    pub async fn start_prometheus() -> Self {
        let config = Config {
            metrics_backend: MetricsBackend::Prometheus,
            metrics_port: Some(0),
            ..test_config()
        };
        let metrics = Metrics::prometheus(prometheus::Registry::new())
            .expect("failed to register instruments");
        Self::start_with(config, Arc::new(metrics)).await
    }

    async fn start_with(config: Config, metrics: Arc<Metrics>) -> Self {
        let main = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind main listener");
        let addr = main.local_addr().expect("no local addr");

        let metrics_listener = if config.metrics_port.is_some() {
            Some(
                TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("failed to bind metrics listener"),
            )
        } else {
            None
        };
        let metrics_addr = metrics_listener
            .as_ref()
            .map(|l| l.local_addr().expect("no local addr"));

        let server = Arc::new(Server::new(&config, Arc::clone(&metrics)));
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(main, metrics_listener).await })
        };

        Self {
            server,
            metrics,
            addr,
            metrics_addr,
            task,
        }
    }

    /// URL for `path` on the application listener.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// URL for `path` on the metrics listener.
    pub fn metrics_url(&self, path: &str) -> String {
        let addr = self.metrics_addr.expect("server has no metrics listener");
        format!("http://{addr}{path}")
    }

    /// Shut down and wait for the serve task to finish.
    pub async fn shutdown(self) {
        self.server
            .shutdown(Duration::from_secs(5))
            .await
            .expect("shutdown failed");
        self.task
            .await
            .expect("serve task panicked")
            .expect("serve returned an error");
    }
}

/// Configuration for in-process servers.
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        service_name: TEST_SERVICE_NAME.into(),
        otel_endpoint: "127.0.0.1:1".into(),
        logs_enabled: false,
        ..Config::default()
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
