//! Structured logging.
//!
//! [`Logger::scope`] tags every event with the source file and function it
//! was emitted from. [`init_subscriber`] installs the JSON formatter together
//! with the OpenTelemetry layers.

use crate::error::ServiceError;
use crate::tracer::Tracer;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::util::SubscriberInitExt;

/// Field-tagging front end over `tracing`.
#[derive(Debug, Clone)]
pub struct Logger {
    service: Arc<str>,
}

impl Logger {
    /// Creates a logger whose events carry `service`.
    pub fn new(service: impl Into<Arc<str>>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Returns a handle tagging events with `file` and `func`.
    pub fn scope(&self, file: &'static str, func: &'static str) -> ScopedLogger<'_> {
        ScopedLogger {
            service: &self.service,
            file,
            func,
        }
    }
}

/// Logger bound to a source location. See [`Logger::scope`].
#[derive(Debug, Clone, Copy)]
pub struct ScopedLogger<'a> {
    service: &'a str,
    file: &'static str,
    func: &'static str,
}

impl ScopedLogger<'_> {
    /// Emits a debug event.
    pub fn debug(&self, message: &str) {
        tracing::debug!(service = self.service, file = self.file, func = self.func, "{message}");
    }

    /// Emits an info event.
    pub fn info(&self, message: &str) {
        tracing::info!(service = self.service, file = self.file, func = self.func, "{message}");
    }

    /// Emits an error event.
    pub fn error(&self, message: &str) {
        tracing::error!(service = self.service, file = self.file, func = self.func, "{message}");
    }
}

/// Installs the global subscriber.
///
/// Events are written to stdout as JSON, filtered by `RUST_LOG` (falling
/// back to `default_filter`). `tracing` spans are exported through
/// `tracer`, and events are bridged to OTLP logs when a logger provider is
/// given. Neither OTel layer sees the transport crates the exporters run
/// on; see [`export_filter`].
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_subscriber(
    default_filter: &str,
    tracer: &Tracer,
    logger_provider: Option<&SdkLoggerProvider>,
) -> Result<(), ServiceError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true);

    let telemetry_layer = tracing_opentelemetry::layer()
        .with_tracer(tracer.sdk_tracer().clone())
        .with_filter(export_filter());
    let log_layer = logger_provider
        .map(|provider| OpenTelemetryTracingBridge::new(provider).with_filter(export_filter()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(telemetry_layer)
        .with(log_layer)
        .try_init()?;

    Ok(())
}

/// Per-layer filter for the OTel layers.
///
/// The gRPC exporters emit `h2`, `hyper`, `tonic` and `tower` events while
/// exporting; bridging those back into OTLP would feed every export into the
/// next one.
pub fn export_filter() -> Targets {
    Targets::new()
        .with_default(LevelFilter::TRACE)
        .with_target("h2", LevelFilter::OFF)
        .with_target("hyper", LevelFilter::OFF)
        .with_target("hyper_util", LevelFilter::OFF)
        .with_target("tonic", LevelFilter::OFF)
        .with_target("tower", LevelFilter::OFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let sink = Captured::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        sink.text()
    }

    #[test]
    fn scoped_events_carry_file_and_func() {
        let logger = Logger::new("demo-server");
        let output = capture(|| logger.scope("main.rs", "handler").info("Hello World"));

        assert!(output.contains(r#""file":"main.rs""#), "{output}");
        assert!(output.contains(r#""func":"handler""#), "{output}");
        assert!(output.contains(r#""service":"demo-server""#), "{output}");
        assert!(output.contains("Hello World"), "{output}");
    }

    #[test]
    fn export_filter_drops_transport_crates() {
        let filter = export_filter();
        for target in [
            "h2::codec",
            "hyper::proto",
            "hyper_util::client",
            "tonic::transport",
            "tower::buffer",
        ] {
            assert!(!filter.would_enable(target, &tracing::Level::ERROR), "{target}");
        }
        assert!(filter.would_enable("demo_server::handler", &tracing::Level::DEBUG));
        assert!(filter.would_enable("demo_server::server", &tracing::Level::INFO));
    }

    #[test]
    fn each_level_is_emitted() {
        let logger = Logger::new("svc");
        let output = capture(|| {
            let scoped = logger.scope("logger.rs", "levels");
            scoped.debug("d");
            scoped.info("i");
            scoped.error("e");
        });

        for level in ["DEBUG", "INFO", "ERROR"] {
            assert!(output.contains(&format!(r#""level":"{level}""#)), "{output}");
        }
    }
}
