//! HTTP server setup and lifecycle.
//!
//! Configures axum with:
//! - Application routes on the main listener
//! - Prometheus `/metrics` on a second listener when that backend is active
//! - Graceful shutdown bounded by a deadline
//!
//! Lifecycle: `Created -> Started -> ShuttingDown -> Stopped`. Sockets are
//! only opened by [`Server::start`]; shutdown goes through [`Shutdownable`]
//! targets so tests can substitute their own.

use async_trait::async_trait;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::error::ServerError;
use crate::handlers::{create_router, AppState};
use crate::observability::metrics::Metrics;
use crate::observability::prometheus;

/// Something that can be shut down within a deadline.
#[async_trait]
pub trait Shutdownable: Send + Sync {
    /// Stop accepting work and wait up to `deadline` for in-flight work.
    ///
    /// Must return `Ok` if nothing was ever started, and when called again
    /// after a previous shutdown.
    async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError>;
}

/// Shutdown handle for one listener.
///
/// Serving holds a tracker token until the graceful drain finishes, so
/// `shutdown` waits exactly as long as connections are still open.
#[derive(Debug)]
pub struct ListenerHandle {
    name: &'static str,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ListenerHandle {
    /// Create a handle for the listener called `name` (used in logs).
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Serve `router` on `listener` until shutdown is requested.
    pub async fn serve(&self, listener: TcpListener, router: Router) -> Result<(), ServerError> {
        let _serving = self.tracker.token();
        let token = self.token.clone();
        let name = self.name;

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            token.cancelled().await;
            tracing::info!(listener = name, "Listener draining connections");
        })
        .await
        .map_err(ServerError::Serve)?;

        tracing::info!(listener = name, "Listener stopped");
        Ok(())
    }
}

#[async_trait]
impl Shutdownable for ListenerHandle {
    async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        self.tracker.close();
        self.token.cancel();

        tokio::time::timeout(deadline, self.tracker.wait())
            .await
            .map_err(|_| ServerError::ShutdownTimeout {
                listener: self.name,
                deadline,
            })
    }
}

/// Shutdown targets, in the order they are shut down.
struct ShutdownTargets {
    metrics: Option<Arc<dyn Shutdownable>>,
    main: Arc<dyn Shutdownable>,
}

/// A metrics listener: address and the router serving `/metrics`.
struct MetricsEndpoint {
    addr: String,
    router: Router,
    handle: Arc<ListenerHandle>,
}

/// The application HTTP server.
pub struct Server {
    addr: String,
    router: Router,
    main: Arc<ListenerHandle>,
    metrics: Option<MetricsEndpoint>,
    targets: ShutdownTargets,
    started: AtomicBool,
}

impl Server {
    /// Create a server for `config` recording into `metrics`.
    ///
    /// A metrics listener is configured only when the config has a metrics
    /// port and the registry has a Prometheus backend.
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        let metrics_endpoint = config
            .metrics_addr()
            .zip(metrics.registry().cloned())
            .map(|(addr, registry)| MetricsEndpoint {
                addr,
                router: prometheus::create_router(registry),
                handle: Arc::new(ListenerHandle::new("metrics")),
            });

        let router = create_router(AppState::new(&config.service_name, metrics));
        let main = Arc::new(ListenerHandle::new("http"));

        let targets = ShutdownTargets {
            metrics: metrics_endpoint
                .as_ref()
                .map(|endpoint| Arc::clone(&endpoint.handle) as Arc<dyn Shutdownable>),
            main: Arc::clone(&main) as Arc<dyn Shutdownable>,
        };

        Self {
            addr: config.listen_addr(),
            router,
            main,
            metrics: metrics_endpoint,
            targets,
            started: AtomicBool::new(false),
        }
    }

    /// Replace the shutdown targets.
    ///
    /// `metrics` is shut down first, then `main`.
    #[must_use]
    pub fn with_shutdown_targets(
        mut self,
        main: Arc<dyn Shutdownable>,
        metrics: Option<Arc<dyn Shutdownable>>,
    ) -> Self {
        self.targets = ShutdownTargets { metrics, main };
        self
    }

    /// Address the application listener binds to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Address the metrics listener binds to, if there is one.
    pub fn metrics_addr(&self) -> Option<&str> {
        self.metrics.as_ref().map(|endpoint| endpoint.addr.as_str())
    }

    /// Bind the configured listeners and serve until shutdown.
    ///
    /// A bind failure is returned as [`ServerError::Bind`].
    pub async fn start(&self) -> Result<(), ServerError> {
        self.mark_started()?;

        let main = bind(&self.addr).await?;
        let metrics = match &self.metrics {
            Some(endpoint) => Some(bind(&endpoint.addr).await?),
            None => None,
        };

        self.run(main, metrics).await
    }

    /// Serve on listeners that are already bound.
    ///
    /// `metrics` is ignored when the server has no metrics endpoint.
    pub async fn serve(
        &self,
        main: TcpListener,
        metrics: Option<TcpListener>,
    ) -> Result<(), ServerError> {
        self.mark_started()?;
        self.run(main, metrics).await
    }

    fn mark_started(&self) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        Ok(())
    }

    async fn run(
        &self,
        main: TcpListener,
        metrics: Option<TcpListener>,
    ) -> Result<(), ServerError> {
        log_listening("http", &main);

        let serve_metrics = async {
            match (metrics, &self.metrics) {
                (Some(listener), Some(endpoint)) => {
                    log_listening("metrics", &listener);
                    endpoint.handle.serve(listener, endpoint.router.clone()).await
                }
                _ => Ok(()),
            }
        };
        let serve_main = self.main.serve(main, self.router.clone());

        let (main_result, metrics_result) = tokio::join!(serve_main, serve_metrics);
        main_result.and(metrics_result)
    }

    /// Shut down the metrics listener, then the main listener.
    ///
    /// Both are attempted even if the first fails; the first error is
    /// returned. Draining shares a single `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        let expires = Instant::now() + deadline;
        let mut first_error = None;

        if let Some(metrics) = &self.targets.metrics {
            if let Err(e) = metrics.shutdown(deadline).await {
                tracing::warn!(error = %e, "Metrics listener shutdown failed");
                first_error.get_or_insert(e);
            }
        }

        let remaining = expires.saturating_duration_since(Instant::now());
        if let Err(e) = self.targets.main.shutdown(remaining).await {
            tracing::warn!(error = %e, "HTTP listener shutdown failed");
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

fn log_listening(name: &'static str, listener: &TcpListener) {
    match listener.local_addr() {
        Ok(address) => tracing::info!(listener = name, %address, "Starting HTTP listener"),
        Err(e) => tracing::warn!(listener = name, error = %e, "Starting HTTP listener on unknown address"),
    }
}
