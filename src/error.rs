//! Error types for configuration, telemetry bootstrap and serving.

use figment::Error as FigmentError;
use std::time::Duration;

/// Errors from startup, serving and shutdown.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// Failed to extract configuration from sources.
    #[error("configuration error: {0}")]
    Config(#[source] Box<FigmentError>),

    /// Collector endpoint uses a scheme the gRPC exporters cannot dial.
    #[error("invalid collector endpoint: {url} (expected host:port, http:// or https://)")]
    InvalidEndpoint {
        /// The rejected endpoint.
        url: String,
    },

    /// Failed to create trace exporter.
    #[error("failed to create trace exporter")]
    TraceExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to create metric exporter.
    #[error("failed to create metric exporter")]
    MetricExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to create log exporter.
    #[error("failed to create log exporter")]
    LogExporter(#[source] opentelemetry_otlp::ExporterBuildError),

    /// Failed to install the tracing subscriber.
    #[error("failed to initialise tracing subscriber")]
    TracingSubscriber(#[from] tracing_subscriber::util::TryInitError),

    /// A provider failed to flush.
    #[error("failed to flush {signal} provider")]
    Flush {
        /// Signal whose provider failed.
        signal: &'static str,
        /// Underlying SDK error.
        #[source]
        source: opentelemetry_sdk::error::OTelSdkError,
    },

    /// A provider failed to shut down.
    #[error("failed to shut down {signal} provider")]
    Shutdown {
        /// Signal whose provider failed.
        signal: &'static str,
        /// Underlying SDK error.
        #[source]
        source: opentelemetry_sdk::error::OTelSdkError,
    },

    /// A provider did not finish shutting down in time.
    #[error("{signal} provider did not shut down within {timeout:?}")]
    ShutdownTimeout {
        /// Signal whose provider timed out.
        signal: &'static str,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// The thread running a provider shutdown went away without a result.
    #[error("{signal} provider shutdown was aborted")]
    ShutdownAborted {
        /// Signal whose provider shutdown was lost.
        signal: &'static str,
    },

    /// Failed to bind the HTTP listener.
    #[error("failed to bind {addr}")]
    Bind {
        /// Address that could not be bound.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an I/O error.
    #[error("HTTP server failed")]
    Serve(#[source] std::io::Error),
}
