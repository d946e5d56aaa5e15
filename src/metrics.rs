//! Meter provider: OTLP/gRPC metric export on a fixed push interval.

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::tracer::build_metadata;
use opentelemetry::InstrumentationScope;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

/// Owns the meter provider and hands out meters scoped to the service.
#[derive(Clone)]
pub struct Metrics {
    provider: SdkMeterProvider,
    scope: String,
}

impl Metrics {
    /// Builds the provider from configuration.
    ///
    /// With metrics disabled the provider has no reader and measurements are
    /// discarded.
    pub fn from_config(config: &ServiceConfig, resource: Resource) -> Result<Self, ServiceError> {
        let mut builder = SdkMeterProvider::builder().with_resource(resource);

        if config.metrics.enabled {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(config.collector_url())
                .with_timeout(config.endpoint.timeout)
                .with_metadata(build_metadata(&config.endpoint.headers))
                .build()
                .map_err(ServiceError::MetricExporter)?;

            let reader = PeriodicReader::builder(exporter)
                .with_interval(config.metrics.export_interval)
                .build();
            builder = builder.with_reader(reader);
        }

        Ok(Self::from_provider(builder.build(), config.scope_name()))
    }

    /// Wraps an existing provider.
    pub fn from_provider(provider: SdkMeterProvider, scope: &str) -> Self {
        Self {
            provider,
            scope: scope.to_string(),
        }
    }

    /// Returns a meter for the service's instrumentation scope.
    pub fn meter(&self) -> Meter {
        self.provider
            .meter_with_scope(InstrumentationScope::builder(self.scope.clone()).build())
    }

    /// Returns the underlying provider.
    pub fn provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    /// Collects and pushes pending measurements.
    pub fn force_flush(&self) -> OTelSdkResult {
        self.provider.force_flush()
    }

    /// Performs a final collection and closes the exporter.
    pub fn shutdown(&self) -> OTelSdkResult {
        self.provider.shutdown()
    }
}
