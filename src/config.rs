//! Configuration types for the demo server.
//!
//! These types are deserialised by figment from layered sources (defaults,
//! an optional TOML file, environment variables, programmatic overrides).
//! See [`ConfigBuilder`](crate::ConfigBuilder).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Collector address used when `OTEL_EXPORTER_OTLP_ENDPOINT` is unset.
pub const DEFAULT_COLLECTOR_ENDPOINT: &str = "otel-collector:4317";

/// Service name reported in the resource and used as instrumentation scope.
pub const DEFAULT_SERVICE_NAME: &str = "demo-server";

/// Compute environment for resource attribute detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeEnvironment {
    /// Host, OS, process and Rust detectors; Kubernetes when detected.
    #[default]
    Auto,
    /// Generic detectors plus the Kubernetes detector.
    Kubernetes,
    /// Only explicitly configured attributes.
    None,
}

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings.
    pub server: ServerConfig,

    /// Collector endpoint settings.
    pub endpoint: EndpointConfig,

    /// Resource attributes attached to every signal.
    pub resource: ResourceConfig,

    /// Trace export settings.
    pub traces: TracesConfig,

    /// Metric export settings.
    pub metrics: MetricsConfig,

    /// Log export settings. Disabled unless `OTEL_LOGS_EXPORTER=otlp`.
    pub logs: LogsConfig,

    /// Upper bound for flushing and closing each provider at shutdown.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            endpoint: EndpointConfig::default(),
            resource: ResourceConfig::default(),
            traces: TracesConfig::default(),
            metrics: MetricsConfig::default(),
            logs: LogsConfig::default(),
            shutdown_timeout: Duration::from_secs(5),
            log_filter: "info,demo_server=debug".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Returns the endpoint URL handed to the gRPC exporters.
    ///
    /// A bare `host:port` is dialled in plaintext, so it gains an `http://`
    /// prefix. URLs that already carry a scheme are returned unchanged.
    #[must_use]
    pub fn collector_url(&self) -> String {
        let url = self.endpoint.url.trim_end_matches('/');
        if has_scheme(url) {
            url.to_string()
        } else {
            format!("http://{url}")
        }
    }

    /// Returns the scope name for tracers and meters.
    #[must_use]
    pub fn scope_name(&self) -> &str {
        &self.resource.service_name
    }
}

pub(crate) fn has_scheme(url: &str) -> bool {
    url.contains("://")
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen_addr: String,

    /// Requests taking longer than this are answered with 408.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Artificial delay before the handler does any work.
    #[serde(with = "humantime_serde")]
    pub response_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            request_timeout: Duration::from_secs(20),
            response_delay: Duration::from_secs(1),
        }
    }
}

/// Collector endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Collector address, either `host:port` or an `http(s)://` URL.
    pub url: String,

    /// Per-export request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// gRPC metadata sent with every export.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_COLLECTOR_ENDPOINT.to_string(),
            timeout: Duration::from_secs(10),
            headers: HashMap::new(),
        }
    }
}

/// Resource configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Service name.
    pub service_name: String,

    /// Service version.
    pub service_version: Option<String>,

    /// Deployment environment (e.g. "production", "staging").
    pub deployment_environment: Option<String>,

    /// Additional resource attributes.
    #[serde(default)]
    pub attributes: HashMap<String, String>,

    /// Which resource detectors run.
    #[serde(default)]
    pub compute_environment: ComputeEnvironment,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            deployment_environment: None,
            attributes: HashMap::new(),
            compute_environment: ComputeEnvironment::default(),
        }
    }
}

/// Trace export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracesConfig {
    /// Whether spans are exported.
    pub enabled: bool,

    /// Batch span processor settings.
    pub batch: BatchConfig,
}

impl Default for TracesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch: BatchConfig::default(),
        }
    }
}

/// Metric export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics are exported.
    pub enabled: bool,

    /// Push interval of the periodic reader.
    #[serde(with = "humantime_serde")]
    pub export_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_interval: Duration::from_secs(2),
        }
    }
}

/// Log export configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Whether log records are exported over OTLP.
    pub enabled: bool,

    /// Batch log processor settings.
    pub batch: BatchConfig,
}

/// Batch processor configuration shared by spans and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum queue size.
    pub max_queue_size: usize,

    /// Maximum batch size for export.
    pub max_export_batch_size: usize,

    /// Delay between scheduled exports.
    #[serde(with = "humantime_serde")]
    pub scheduled_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
        }
    }
}
