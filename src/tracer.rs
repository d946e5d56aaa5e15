//! Tracer provider: OTLP/gRPC span export, batching, always-on sampling and
//! W3C propagation.

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use axum::http::HeaderMap;
use opentelemetry::propagation::{Extractor, TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::{Context, InstrumentationScope};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracer, SdkTracerProvider,
};
use std::collections::HashMap;
use std::sync::Arc;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};

/// Span factory for the request path.
///
/// Owns the provider rather than registering it globally, so handlers get
/// their tracer through application state.
#[derive(Clone)]
pub struct Tracer {
    provider: SdkTracerProvider,
    tracer: SdkTracer,
    propagator: Arc<TextMapCompositePropagator>,
}

impl Tracer {
    /// Builds the provider from configuration.
    ///
    /// With traces disabled the provider has no processor, so spans are
    /// created and dropped without export.
    pub fn from_config(config: &ServiceConfig, resource: Resource) -> Result<Self, ServiceError> {
        let mut builder = SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource);

        if config.traces.enabled {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(config.collector_url())
                .with_timeout(config.endpoint.timeout)
                .with_metadata(build_metadata(&config.endpoint.headers))
                .build()
                .map_err(ServiceError::TraceExporter)?;

            let batch = &config.traces.batch;
            let batch_config = BatchConfigBuilder::default()
                .with_max_queue_size(batch.max_queue_size)
                .with_max_export_batch_size(batch.max_export_batch_size)
                .with_scheduled_delay(batch.scheduled_delay)
                .build();

            builder = builder.with_span_processor(
                BatchSpanProcessor::builder(exporter)
                    .with_batch_config(batch_config)
                    .build(),
            );
        }

        Ok(Self::from_provider(builder.build(), config.scope_name()))
    }

    /// Wraps an existing provider.
    pub fn from_provider(provider: SdkTracerProvider, scope: &str) -> Self {
        let tracer =
            provider.tracer_with_scope(InstrumentationScope::builder(scope.to_string()).build());
        let propagator = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);

        Self {
            provider,
            tracer,
            propagator: Arc::new(propagator),
        }
    }

    /// Returns the underlying provider.
    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    /// Returns the SDK tracer, e.g. for a `tracing-opentelemetry` layer.
    pub fn sdk_tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    /// Extracts trace context and baggage propagated in request headers.
    pub fn extract(&self, headers: &HeaderMap) -> Context {
        self.propagator.extract(&HeaderExtractor(headers))
    }

    /// Starts a server span as a child of `parent`.
    ///
    /// The span lives in the returned context and ends when the last clone
    /// of that context is dropped.
    pub fn start_span(&self, name: &'static str, parent: &Context) -> Context {
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(SpanKind::Server)
            .start_with_context(&self.tracer, parent);
        parent.with_span(span)
    }

    /// Flushes queued spans.
    pub fn force_flush(&self) -> OTelSdkResult {
        self.provider.force_flush()
    }

    /// Flushes and closes the span exporter.
    pub fn shutdown(&self) -> OTelSdkResult {
        self.provider.shutdown()
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

pub(crate) fn build_metadata(headers: &HashMap<String, String>) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (key, value) in headers {
        if let (Ok(k), Ok(v)) = (
            key.parse::<MetadataKey<_>>(),
            value.parse::<MetadataValue<_>>(),
        ) {
            metadata.insert(k, v);
        }
    }
    metadata
}
