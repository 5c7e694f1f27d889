//! Configuration parsing for the service.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variables (empty values fall back to the default)
//! - Defaults matching the deployment manifests

use clap::Parser;
use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Default service name reported in the resource descriptor and root response.
pub const DEFAULT_SERVICE_NAME: &str = "dm-nkp-gitops-custom-app";

/// Default OTLP/gRPC collector endpoint.
pub const DEFAULT_OTLP_ENDPOINT: &str = "otel-collector:4317";

/// Default console log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,dm_nkp_gitops_custom_app=debug";

/// Return the value of `key` if it is set and non-empty, otherwise `default`.
pub fn get_env(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Which metrics backend the registry records into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricsBackend {
    /// OpenTelemetry instruments exported over OTLP/gRPC.
    #[default]
    Otlp,
    /// Prometheus client instruments scraped from a second listener.
    Prometheus,
}

impl FromStr for MetricsBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "otlp" | "otel" | "opentelemetry" => Ok(Self::Otlp),
            "prometheus" | "prom" => Ok(Self::Prometheus),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for MetricsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Otlp => f.write_str("otlp"),
            Self::Prometheus => f.write_str("prometheus"),
        }
    }
}

/// Command-line overrides. Anything left unset is read from the environment.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "dm-nkp-gitops-custom-app")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Host address to bind to [env: HOST]
    #[arg(long)]
    pub host: Option<String>,

    /// Port for the application listener [env: PORT]
    #[arg(short, long)]
    pub port: Option<String>,

    /// Port for the Prometheus /metrics listener [env: METRICS_PORT]
    #[arg(long)]
    pub metrics_port: Option<String>,

    /// Service name for telemetry resources [env: OTEL_SERVICE_NAME]
    #[arg(long)]
    pub service_name: Option<String>,

    /// OTLP collector endpoint [env: OTEL_EXPORTER_OTLP_ENDPOINT]
    #[arg(long)]
    pub otel_endpoint: Option<String>,

    /// Metrics backend: otlp or prometheus [env: METRICS_BACKEND]
    #[arg(long)]
    pub metrics_backend: Option<String>,

    /// Console log filter [env: RUST_LOG]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Resolved service configuration. Immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Present only for the Prometheus backend.
    pub metrics_port: Option<u16>,
    pub service_name: String,
    pub otel_endpoint: String,
    /// Export logs over OTLP in addition to the console.
    pub logs_enabled: bool,
    pub metrics_backend: MetricsBackend,
    pub log_level: String,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(Cli::parse())
    }

    /// Merge CLI overrides with the environment and defaults.
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let pick = |flag: Option<String>, key: &str, default: &str| {
            flag.filter(|v| !v.is_empty())
                .unwrap_or_else(|| get_env(key, default))
        };

        let metrics_backend: MetricsBackend =
            pick(cli.metrics_backend, "METRICS_BACKEND", "otlp").parse()?;

        let port = parse_port("PORT", &pick(cli.port, "PORT", "8080"))?;
        let metrics_port = match metrics_backend {
            MetricsBackend::Prometheus => Some(parse_port(
                "METRICS_PORT",
                &pick(cli.metrics_port, "METRICS_PORT", "9090"),
            )?),
            MetricsBackend::Otlp => None,
        };

        Ok(Self {
            host: pick(cli.host, "HOST", "0.0.0.0"),
            port,
            metrics_port,
            service_name: pick(cli.service_name, "OTEL_SERVICE_NAME", DEFAULT_SERVICE_NAME),
            otel_endpoint: pick(
                cli.otel_endpoint,
                "OTEL_EXPORTER_OTLP_ENDPOINT",
                DEFAULT_OTLP_ENDPOINT,
            ),
            logs_enabled: get_env("OTEL_LOGS_ENABLED", "true") == "true",
            metrics_backend,
            log_level: pick(cli.log_level, "RUST_LOG", DEFAULT_LOG_FILTER),
        })
    }

    /// Address of the application listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address of the metrics listener, if the backend has one.
    pub fn metrics_addr(&self) -> Option<String> {
        self.metrics_port
            .map(|port| format!("{}:{}", self.host, port))
    }

    /// Collector endpoint as a URL.
    ///
    /// Bare `host:port` endpoints get an `http://` scheme, giving an
    /// insecure (plaintext) gRPC transport.
    pub fn collector_url(&self) -> String {
        if self.otel_endpoint.contains("://") {
            self.otel_endpoint.clone()
        } else {
            format!("http://{}", self.otel_endpoint)
        }
    }
}

fn parse_port(key: &'static str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidPort {
        key,
        value: value.to_string(),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            metrics_port: None,
            service_name: DEFAULT_SERVICE_NAME.into(),
            otel_endpoint: DEFAULT_OTLP_ENDPOINT.into(),
            logs_enabled: true,
            metrics_backend: MetricsBackend::Otlp,
            log_level: DEFAULT_LOG_FILTER.into(),
        }
    }
}
