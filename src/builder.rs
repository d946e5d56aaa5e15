//! Layered configuration loading.
//!
//! Sources are merged in order, later sources taking precedence:
//! 1. Compiled defaults ([`ServiceConfig::default`])
//! 2. An optional TOML file
//! 3. Prefixed environment variables (`DEMO_SERVER__LISTEN_ADDR`, ...)
//! 4. Standard `OTEL_*` environment variables
//! 5. Programmatic overrides

use crate::ServiceError;
use crate::config::{ComputeEnvironment, ServiceConfig, has_scheme};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Builder that resolves a [`ServiceConfig`] from layered sources.
///
/// # Example
///
/// ```no_run
/// use demo_server::{ConfigBuilder, ServiceError};
///
/// let config = ConfigBuilder::new()
///     .with_file("demo-server.toml")
///     .with_env("DEMO_")
///     .with_standard_env()
///     .extract()?;
/// # Ok::<(), ServiceError>(())
/// ```
#[must_use = "builders do nothing unless .extract() is called"]
pub struct ConfigBuilder {
    figment: Figment,
    resource_attributes: HashMap<String, String>,
}

impl ConfigBuilder {
    /// Creates a builder seeded with the compiled defaults.
    pub fn new() -> Self {
        Self::from_figment(Figment::from(Serialized::defaults(
            ServiceConfig::default(),
        )))
    }

    /// Creates a builder from an existing figment.
    pub fn from_figment(figment: Figment) -> Self {
        Self {
            figment,
            resource_attributes: HashMap::new(),
        }
    }

    /// Merges a TOML file. Missing files are skipped.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            self.figment = self.figment.merge(Toml::file(path));
        }
        self
    }

    /// Merges environment variables with the given prefix.
    ///
    /// Nested keys are separated by a double underscore, so with prefix
    /// `DEMO_`:
    /// - `DEMO_SERVER__LISTEN_ADDR` → `server.listen_addr`
    /// - `DEMO_SERVER__RESPONSE_DELAY=250ms` → `server.response_delay`
    /// - `DEMO_RESOURCE__SERVICE_NAME` → `resource.service_name`
    pub fn with_env(mut self, prefix: &str) -> Self {
        self.figment = self.figment.merge(Env::prefixed(prefix).split("__"));
        self
    }

    /// Merges the standard OpenTelemetry environment variables.
    ///
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT` → collector endpoint
    /// - `OTEL_EXPORTER_OTLP_TIMEOUT` → export timeout (milliseconds)
    /// - `OTEL_SERVICE_NAME` → service name
    /// - `OTEL_TRACES_EXPORTER` / `OTEL_METRICS_EXPORTER` → `none` disables
    /// - `OTEL_LOGS_EXPORTER` → `otlp` enables log export
    /// - `OTEL_METRIC_EXPORT_INTERVAL` → periodic reader interval (milliseconds)
    pub fn with_standard_env(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self.figment = self
                .figment
                .merge(Serialized::default("endpoint.url", endpoint));
        }

        if let Some(timeout) = env_millis("OTEL_EXPORTER_OTLP_TIMEOUT") {
            self.figment = self
                .figment
                .merge(Serialized::default("endpoint.timeout", timeout));
        }

        if let Ok(service_name) = std::env::var("OTEL_SERVICE_NAME") {
            self.figment = self
                .figment
                .merge(Serialized::default("resource.service_name", service_name));
        }

        if let Ok(exporter) = std::env::var("OTEL_TRACES_EXPORTER") {
            self.figment = self
                .figment
                .merge(Serialized::default("traces.enabled", exporter != "none"));
        }

        if let Ok(exporter) = std::env::var("OTEL_METRICS_EXPORTER") {
            self.figment = self
                .figment
                .merge(Serialized::default("metrics.enabled", exporter != "none"));
        }

        if let Ok(exporter) = std::env::var("OTEL_LOGS_EXPORTER") {
            self.figment = self
                .figment
                .merge(Serialized::default("logs.enabled", exporter == "otlp"));
        }

        if let Some(interval) = env_millis("OTEL_METRIC_EXPORT_INTERVAL") {
            self.figment = self
                .figment
                .merge(Serialized::default("metrics.export_interval", interval));
        }

        self
    }

    /// Sets the collector endpoint.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("endpoint.url", url.into()));
        self
    }

    /// Adds a gRPC metadata entry to every export request.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let header_key = format!("endpoint.headers.{}", key.into());
        self.figment = self
            .figment
            .merge(Serialized::default(&header_key, value.into()));
        self
    }

    /// Sets the service name resource attribute.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("resource.service_name", name.into()));
        self
    }

    /// Sets the HTTP listen address.
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("server.listen_addr", addr.into()));
        self
    }

    /// Sets the artificial delay applied before each response.
    pub fn response_delay(mut self, delay: Duration) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "server.response_delay",
            humantime_string(delay),
        ));
        self
    }

    /// Sets the per-provider shutdown bound.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "shutdown_timeout",
            humantime_string(timeout),
        ));
        self
    }

    /// Enables or disables trace export.
    pub fn traces(mut self, enabled: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("traces.enabled", enabled));
        self
    }

    /// Enables or disables metric export.
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("metrics.enabled", enabled));
        self
    }

    /// Enables or disables log export.
    pub fn logs(mut self, enabled: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("logs.enabled", enabled));
        self
    }

    /// Configures the resource with a builder function.
    ///
    /// ```no_run
    /// use demo_server::{ConfigBuilder, ServiceError};
    ///
    /// let config = ConfigBuilder::new()
    ///     .resource(|r| r
    ///         .service_version("1.2.3")
    ///         .deployment_environment("staging")
    ///         .attribute("team", "platform"))
    ///     .extract()?;
    /// # Ok::<(), ServiceError>(())
    /// ```
    pub fn resource<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ResourceConfigBuilder) -> ResourceConfigBuilder,
    {
        let builder = f(ResourceConfigBuilder::default());

        if let Some(name) = builder.service_name {
            self.figment = self
                .figment
                .merge(Serialized::default("resource.service_name", name));
        }
        if let Some(version) = builder.service_version {
            self.figment = self
                .figment
                .merge(Serialized::default("resource.service_version", version));
        }
        if let Some(env) = builder.deployment_environment {
            self.figment = self.figment.merge(Serialized::default(
                "resource.deployment_environment",
                env,
            ));
        }
        if let Some(env) = builder.compute_environment {
            self.figment = self
                .figment
                .merge(Serialized::default("resource.compute_environment", env));
        }
        self.resource_attributes.extend(builder.attributes);

        self
    }

    /// Resolves the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if a source fails to parse and
    /// [`ServiceError::InvalidEndpoint`] if the endpoint has a scheme other
    /// than `http` or `https`.
    pub fn extract(self) -> Result<ServiceConfig, ServiceError> {
        let mut config: ServiceConfig = self
            .figment
            .extract()
            .map_err(|e| ServiceError::Config(Box::new(e)))?;

        config.resource.attributes.extend(self.resource_attributes);

        let url = &config.endpoint.url;
        if has_scheme(url) && !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ServiceError::InvalidEndpoint { url: url.clone() });
        }

        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent resource overrides for [`ConfigBuilder::resource`].
#[derive(Default)]
#[must_use]
pub struct ResourceConfigBuilder {
    service_name: Option<String>,
    service_version: Option<String>,
    deployment_environment: Option<String>,
    compute_environment: Option<ComputeEnvironment>,
    attributes: HashMap<String, String>,
}

impl ResourceConfigBuilder {
    /// Sets the service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Sets the service version.
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Sets the deployment environment.
    pub fn deployment_environment(mut self, env: impl Into<String>) -> Self {
        self.deployment_environment = Some(env.into());
        self
    }

    /// Selects which resource detectors run.
    pub fn compute_environment(mut self, env: ComputeEnvironment) -> Self {
        self.compute_environment = Some(env);
        self
    }

    /// Adds a resource attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

fn env_millis(key: &str) -> Option<String> {
    let millis: u64 = std::env::var(key).ok()?.trim().parse().ok()?;
    Some(humantime_string(Duration::from_millis(millis)))
}

fn humantime_string(duration: Duration) -> String {
    humantime_serde::re::humantime::format_duration(duration).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_any_source() {
        let config = ConfigBuilder::new().extract().unwrap();

        assert_eq!(config.endpoint.url, "otel-collector:4317");
        assert_eq!(config.resource.service_name, "demo-server");
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert!(config.traces.enabled);
        assert!(config.metrics.enabled);
        assert!(!config.logs.enabled);
    }

    #[test]
    fn missing_endpoint_env_falls_back_to_collector_default() {
        temp_env::with_var_unset("OTEL_EXPORTER_OTLP_ENDPOINT", || {
            let config = ConfigBuilder::new().with_standard_env().extract().unwrap();
            assert_eq!(config.endpoint.url, "otel-collector:4317");
            assert_eq!(config.collector_url(), "http://otel-collector:4317");
        });
    }

    #[test]
    fn endpoint_env_overrides_default() {
        temp_env::with_var(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            Some("collector.internal:4317"),
            || {
                let config = ConfigBuilder::new().with_standard_env().extract().unwrap();
                assert_eq!(config.endpoint.url, "collector.internal:4317");
            },
        );
    }

    #[test]
    fn service_name_env() {
        temp_env::with_var("OTEL_SERVICE_NAME", Some("renamed"), || {
            let config = ConfigBuilder::new().with_standard_env().extract().unwrap();
            assert_eq!(config.resource.service_name, "renamed");
        });
    }

    #[test]
    fn exporters_none_disables_signals() {
        temp_env::with_vars(
            [
                ("OTEL_TRACES_EXPORTER", Some("none")),
                ("OTEL_METRICS_EXPORTER", Some("none")),
            ],
            || {
                let config = ConfigBuilder::new().with_standard_env().extract().unwrap();
                assert!(!config.traces.enabled);
                assert!(!config.metrics.enabled);
            },
        );
    }

    #[test]
    fn logs_exporter_otlp_enables_log_export() {
        temp_env::with_var("OTEL_LOGS_EXPORTER", Some("otlp"), || {
            let config = ConfigBuilder::new().with_standard_env().extract().unwrap();
            assert!(config.logs.enabled);
        });
    }

    #[test]
    fn millisecond_env_vars_become_durations() {
        temp_env::with_vars(
            [
                ("OTEL_METRIC_EXPORT_INTERVAL", Some("1500")),
                ("OTEL_EXPORTER_OTLP_TIMEOUT", Some("250")),
            ],
            || {
                let config = ConfigBuilder::new().with_standard_env().extract().unwrap();
                assert_eq!(config.metrics.export_interval, Duration::from_millis(1500));
                assert_eq!(config.endpoint.timeout, Duration::from_millis(250));
            },
        );
    }

    #[test]
    fn unparsable_millis_are_ignored() {
        temp_env::with_var("OTEL_METRIC_EXPORT_INTERVAL", Some("soon"), || {
            let config = ConfigBuilder::new().with_standard_env().extract().unwrap();
            assert_eq!(config.metrics.export_interval, Duration::from_secs(2));
        });
    }

    #[test]
    fn prefixed_env_reaches_nested_keys() {
        temp_env::with_vars(
            [
                ("DEMO_SERVER__LISTEN_ADDR", Some("127.0.0.1:9000")),
                ("DEMO_SERVER__RESPONSE_DELAY", Some("250ms")),
            ],
            || {
                let config = ConfigBuilder::new().with_env("DEMO_").extract().unwrap();
                assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
                assert_eq!(config.server.response_delay, Duration::from_millis(250));
            },
        );
    }

    #[test]
    fn toml_file_is_layered_under_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "demo-server.toml",
                r#"
                    log_filter = "info"

                    [endpoint]
                    url = "file-collector:4317"

                    [server]
                    listen_addr = "127.0.0.1:8181"
                "#,
            )?;
            jail.set_env("JAILED_ENDPOINT__URL", "env-collector:4317");

            let config = ConfigBuilder::new()
                .with_file("demo-server.toml")
                .with_env("JAILED_")
                .extract()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.endpoint.url, "env-collector:4317");
            assert_eq!(config.server.listen_addr, "127.0.0.1:8181");
            assert_eq!(config.log_filter, "info");
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_skipped() {
        let config = ConfigBuilder::new()
            .with_file("/definitely/not/here.toml")
            .extract()
            .unwrap();
        assert_eq!(config.endpoint.url, "otel-collector:4317");
    }

    #[test]
    fn programmatic_overrides_env() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("env:4317")),
                ("OTEL_SERVICE_NAME", Some("env-service")),
            ],
            || {
                let config = ConfigBuilder::new()
                    .with_standard_env()
                    .endpoint("http://programmatic:4317")
                    .service_name("programmatic-service")
                    .extract()
                    .unwrap();

                assert_eq!(config.endpoint.url, "http://programmatic:4317");
                assert_eq!(config.resource.service_name, "programmatic-service");
            },
        );
    }

    #[test]
    fn resource_closure_sets_fields_and_attributes() {
        let config = ConfigBuilder::new()
            .resource(|r| {
                r.service_version("9.9.9")
                    .deployment_environment("staging")
                    .compute_environment(ComputeEnvironment::None)
                    .attribute("team", "platform")
            })
            .extract()
            .unwrap();

        assert_eq!(config.resource.service_version.as_deref(), Some("9.9.9"));
        assert_eq!(
            config.resource.deployment_environment.as_deref(),
            Some("staging")
        );
        assert_eq!(
            config.resource.compute_environment,
            ComputeEnvironment::None
        );
        assert_eq!(
            config.resource.attributes.get("team").map(String::as_str),
            Some("platform")
        );
    }

    #[test]
    fn header_lands_in_endpoint_headers() {
        let config = ConfigBuilder::new()
            .header("authorization", "Bearer token123")
            .extract()
            .unwrap();
        assert_eq!(
            config.endpoint.headers.get("authorization").map(String::as_str),
            Some("Bearer token123")
        );
    }

    #[test]
    fn duration_setters_round_trip_through_figment() {
        let config = ConfigBuilder::new()
            .response_delay(Duration::ZERO)
            .shutdown_timeout(Duration::from_millis(750))
            .extract()
            .unwrap();
        assert_eq!(config.server.response_delay, Duration::ZERO);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(750));
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let result = ConfigBuilder::new().endpoint("ftp://collector:4317").extract();
        assert!(
            matches!(result, Err(ServiceError::InvalidEndpoint { ref url }) if url == "ftp://collector:4317"),
            "expected InvalidEndpoint, got {result:?}"
        );
    }

    #[test]
    fn bare_host_port_is_accepted() {
        let config = ConfigBuilder::new()
            .endpoint("localhost:4317")
            .extract()
            .unwrap();
        assert_eq!(config.collector_url(), "http://localhost:4317");
    }
}
