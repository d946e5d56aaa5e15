//! The `/hello` request handler.

use crate::instruments::RequestMetrics;
use crate::logger::Logger;
use crate::telemetry::Telemetry;
use crate::tracer::Tracer;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use opentelemetry::trace::TraceContextExt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Span name for every `/hello` request.
pub const SPAN_NAME: &str = "helloHandler";

/// Body written on success.
pub const GREETING: &str = "Hello World";

/// Shared state handed to each request.
#[derive(Clone)]
pub struct AppState {
    tracer: Tracer,
    metrics: Arc<RequestMetrics>,
    logger: Logger,
    response_delay: Duration,
}

impl AppState {
    /// Builds handler state from the telemetry facade.
    pub fn new(telemetry: &Telemetry, logger: Logger, response_delay: Duration) -> Self {
        Self {
            tracer: telemetry.tracer().clone(),
            metrics: Arc::new(RequestMetrics::new(telemetry.metrics().meter())),
            logger,
            response_delay,
        }
    }

    /// Returns the tracer handlers start their spans from.
    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    /// Returns the request instruments.
    pub fn metrics(&self) -> &RequestMetrics {
        &self.metrics
    }
}

/// Errors surfaced by the handler as a response.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Writing the response body failed.
    #[error("write operation failed.")]
    Write(#[source] io::Error),
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        match self {
            HandlerError::Write(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
        }
    }
}

/// Writes the greeting into `writer`.
pub fn write_response<W: io::Write>(writer: &mut W) -> Result<(), HandlerError> {
    writer
        .write_all(GREETING.as_bytes())
        .map_err(HandlerError::Write)
}

/// Handles `/hello` for any method.
///
/// Sleeps for the configured delay, starts a server span, records the
/// request instruments and answers `Hello World`. The span is a child of
/// the router's `request` span when one is exported, otherwise of the trace
/// context propagated in the headers.
pub async fn hello(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.response_delay.is_zero() {
        tokio::time::sleep(state.response_delay).await;
    }

    let started = Instant::now();
    let current = tracing::Span::current().context();
    let parent = if current.has_active_span() {
        current
    } else {
        state.tracer.extract(&headers)
    };
    let _cx = state.tracer.start_span(SPAN_NAME, &parent);

    let metrics = &state.metrics;
    metrics.record_request();
    metrics.record_heap_usage();
    metrics.record_task_count();
    metrics.record_memory_allocated();
    metrics.record_uptime();

    let log = state.logger.scope(file!(), "hello");
    log.info(GREETING);

    let mut body = Vec::<u8>::with_capacity(GREETING.len());
    if let Err(e) = write_response(&mut body) {
        log.error(&e.to_string());
        return e.into_response();
    }

    metrics.record_response_time(started.elapsed());
    (StatusCode::OK, body).into_response()
}
