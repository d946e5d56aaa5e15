//! A minimal HTTP service instrumented with OpenTelemetry.
//!
//! Serves `GET /hello` (any method, in fact), emitting one server span and a
//! fixed set of metrics per request. Traces and metrics are pushed to an OTLP
//! collector over gRPC; logs are structured JSON on stdout and can optionally
//! be exported as well.
//!
//! # Example
//!
//! ```no_run
//! use demo_server::{AppState, ConfigBuilder, Logger, ServiceError, Telemetry, server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ServiceError> {
//!     let config = ConfigBuilder::new().with_standard_env().extract()?;
//!     let telemetry = Telemetry::from_config(&config)?;
//!     telemetry.install_subscriber(&config.log_filter)?;
//!
//!     let state = AppState::new(
//!         &telemetry,
//!         Logger::new("demo-server"),
//!         config.server.response_delay,
//!     );
//!     let listener = server::bind(&config.server.listen_addr).await?;
//!     server::serve(
//!         listener,
//!         server::router(state, config.server.request_timeout),
//!         server::shutdown_signal(),
//!     )
//!     .await?;
//!
//!     telemetry.shutdown().await
//! }
//! ```
//!
//! # Configuration
//!
//! Values are layered with figment, later sources winning:
//!
//! 1. Built-in defaults (collector at `otel-collector:4317`)
//! 2. An optional TOML file
//! 3. `DEMO_`-prefixed environment variables, `__` separating nested keys
//! 4. Standard `OTEL_*` variables such as `OTEL_EXPORTER_OTLP_ENDPOINT`
//! 5. Programmatic overrides on [`ConfigBuilder`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod config;
mod error;
mod handler;
mod instruments;
mod logger;
mod metrics;
mod resource;
pub mod server;
mod telemetry;
mod tracer;

pub use builder::{ConfigBuilder, ResourceConfigBuilder};
pub use config::{
    BatchConfig, ComputeEnvironment, DEFAULT_COLLECTOR_ENDPOINT, DEFAULT_SERVICE_NAME,
    EndpointConfig, LogsConfig, MetricsConfig, ResourceConfig, ServerConfig, ServiceConfig,
    TracesConfig,
};
pub use error::ServiceError;
pub use handler::{AppState, GREETING, HandlerError, SPAN_NAME, hello, write_response};
pub use instruments::{MEMORY_ALLOCATED_BOUNDARIES, RESPONSE_TIME_BOUNDARIES_MS, RequestMetrics};
pub use logger::{Logger, ScopedLogger, export_filter, init_subscriber};
pub use metrics::Metrics;
pub use resource::{RustRuntimeDetector, build_resource};
pub use telemetry::Telemetry;
pub use tracer::Tracer;

/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry;
/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry_sdk;
/// Re-exported for version compatibility with this crate's dependencies.
pub use tracing;

/// Re-exported for users who want to construct custom configuration providers.
pub use figment;
