//! Telemetry facade.
//!
//! [`Telemetry`] builds the resource once, owns the tracer, meter and
//! (optionally) logger providers, and shuts them down together. Nothing is
//! registered globally; the request path receives its providers through
//! application state.

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::logger;
use crate::metrics::Metrics;
use crate::resource::build_resource;
use crate::tracer::{Tracer, build_metadata};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::{BatchConfigBuilder, BatchLogProcessor, SdkLoggerProvider};
use std::time::Duration;
use tokio::sync::oneshot;

/// Owns every provider for the lifetime of the service.
pub struct Telemetry {
    tracer: Tracer,
    metrics: Metrics,
    logs: Option<SdkLoggerProvider>,
    shutdown_timeout: Duration,
}

impl Telemetry {
    /// Builds all providers against the configured collector.
    ///
    /// Must be called inside a tokio runtime when any signal is enabled,
    /// since the gRPC channels are created on it.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let resource = build_resource(&config.resource);

        let tracer = Tracer::from_config(config, resource.clone())?;
        let metrics = Metrics::from_config(config, resource.clone())?;
        let logs = if config.logs.enabled {
            Some(build_logger_provider(config, resource)?)
        } else {
            None
        };

        Ok(Self::from_parts(
            tracer,
            metrics,
            logs,
            config.shutdown_timeout,
        ))
    }

    /// Assembles a facade from already built providers.
    pub fn from_parts(
        tracer: Tracer,
        metrics: Metrics,
        logs: Option<SdkLoggerProvider>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            tracer,
            metrics,
            logs,
            shutdown_timeout,
        }
    }

    /// Returns the tracer.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Returns the meter provider wrapper.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Returns the logger provider if log export is enabled.
    pub fn logger_provider(&self) -> Option<&SdkLoggerProvider> {
        self.logs.as_ref()
    }

    /// Installs the global `tracing` subscriber wired to these providers.
    pub fn install_subscriber(&self, default_filter: &str) -> Result<(), ServiceError> {
        logger::init_subscriber(default_filter, &self.tracer, self.logs.as_ref())
    }

    /// Reports what [`Telemetry::from_config`] built.
    ///
    /// Call after [`Telemetry::install_subscriber`]; before that there is no
    /// subscriber to receive the events.
    pub fn log_startup(&self, config: &ServiceConfig) {
        let endpoint = config.collector_url();
        tracing::debug!(
            endpoint = %endpoint,
            enabled = config.traces.enabled,
            "Tracer provider created"
        );
        tracing::debug!(
            endpoint = %endpoint,
            interval = ?config.metrics.export_interval,
            enabled = config.metrics.enabled,
            "Meter provider created"
        );
        tracing::debug!(
            service = %config.resource.service_name,
            endpoint = %endpoint,
            traces = config.traces.enabled,
            metrics = config.metrics.enabled,
            logs = self.logs.is_some(),
            "Telemetry initialised"
        );
    }

    /// Flushes all providers. Errors are logged but not returned.
    pub fn flush(&self) {
        if let Err(e) = self.tracer.force_flush() {
            tracing::error!(target: "otel_lifecycle", error = %e, "Failed to flush tracer provider");
        }

        if let Err(e) = self.metrics.force_flush() {
            tracing::error!(target: "otel_lifecycle", error = %e, "Failed to flush meter provider");
        }

        if let Some(provider) = &self.logs
            && let Err(e) = provider.force_flush()
        {
            tracing::error!(target: "otel_lifecycle", error = %e, "Failed to flush logger provider");
        }
    }

    /// Shuts every provider down concurrently.
    ///
    /// Each provider gets at most the configured shutdown timeout, so the
    /// call returns within that bound even when the collector is
    /// unreachable. Returns the first error in tracer, meter, logger order.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        let limit = self.shutdown_timeout;
        let Self {
            tracer,
            metrics: meters,
            logs: loggers,
            ..
        } = self;

        let (traces, metrics, logs) = tokio::join!(
            bounded("tracer", limit, move || (tracer.force_flush(), tracer.shutdown())),
            bounded("meter", limit, move || (meters.force_flush(), meters.shutdown())),
            async move {
                match loggers {
                    Some(provider) => {
                        bounded("logger", limit, move || {
                            (provider.force_flush(), provider.shutdown())
                        })
                        .await
                    }
                    None => Ok(()),
                }
            },
        );

        for result in [&traces, &metrics, &logs] {
            if let Err(e) = result {
                tracing::error!(target: "otel_lifecycle", error = %e, "Provider shutdown failed");
            }
        }

        traces.and(metrics).and(logs)
    }
}

/// Runs a blocking flush-and-shutdown off the runtime and waits at most
/// `limit` for it.
async fn bounded<F>(signal: &'static str, limit: Duration, close: F) -> Result<(), ServiceError>
where
    F: FnOnce() -> (OTelSdkResult, OTelSdkResult) + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let _ = tx.send(close());
    });

    match tokio::time::timeout(limit, rx).await {
        Ok(Ok((flushed, shut))) => outcome(signal, flushed, shut),
        Ok(Err(_)) => Err(ServiceError::ShutdownAborted { signal }),
        Err(_) => Err(ServiceError::ShutdownTimeout {
            signal,
            timeout: limit,
        }),
    }
}

/// A shutdown error takes precedence over a flush error.
fn outcome(
    signal: &'static str,
    flushed: OTelSdkResult,
    shut: OTelSdkResult,
) -> Result<(), ServiceError> {
    shut.map_err(|source| ServiceError::Shutdown { signal, source })?;
    flushed.map_err(|source| ServiceError::Flush { signal, source })
}

fn build_logger_provider(
    config: &ServiceConfig,
    resource: Resource,
) -> Result<SdkLoggerProvider, ServiceError> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(config.collector_url())
        .with_timeout(config.endpoint.timeout)
        .with_metadata(build_metadata(&config.endpoint.headers))
        .build()
        .map_err(ServiceError::LogExporter)?;

    let batch = &config.logs.batch;
    let batch_config = BatchConfigBuilder::default()
        .with_max_queue_size(batch.max_queue_size)
        .with_max_export_batch_size(batch.max_export_batch_size)
        .with_scheduled_delay(batch.scheduled_delay)
        .build();

    Ok(SdkLoggerProvider::builder()
        .with_log_processor(
            BatchLogProcessor::builder(exporter)
                .with_batch_config(batch_config)
                .build(),
        )
        .with_resource(resource)
        .build())
}
