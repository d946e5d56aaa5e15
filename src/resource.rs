//! Resource descriptor attached to every exported signal.

use crate::config::{ComputeEnvironment, ResourceConfig};
use opentelemetry::KeyValue;
use opentelemetry_resource_detectors::{
    HostResourceDetector, K8sResourceDetector, OsResourceDetector, ProcessResourceDetector,
};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::resource::{ResourceBuilder, ResourceDetector};
use opentelemetry_semantic_conventions::resource::{
    DEPLOYMENT_ENVIRONMENT_NAME, PROCESS_RUNTIME_NAME, SERVICE_VERSION,
};

/// Builds the resource for the configured service.
///
/// `Resource::builder` already contributes the telemetry SDK identity and
/// any `OTEL_RESOURCE_ATTRIBUTES`; detectors are layered on top according to
/// the compute environment, and explicit attributes win last.
pub fn build_resource(config: &ResourceConfig) -> Resource {
    let builder = with_detectors(Resource::builder(), config.compute_environment);

    let mut attributes: Vec<KeyValue> = config
        .attributes
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
        .collect();

    if let Some(version) = &config.service_version {
        attributes.push(KeyValue::new(SERVICE_VERSION, version.clone()));
    }
    if let Some(env) = &config.deployment_environment {
        attributes.push(KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, env.clone()));
    }

    builder
        .with_attributes(attributes)
        .with_service_name(config.service_name.clone())
        .build()
}

fn with_detectors(builder: ResourceBuilder, env: ComputeEnvironment) -> ResourceBuilder {
    let generic = |b: ResourceBuilder| {
        b.with_detector(Box::new(HostResourceDetector::default()))
            .with_detector(Box::new(OsResourceDetector))
            .with_detector(Box::new(ProcessResourceDetector))
            .with_detector(Box::new(RustRuntimeDetector))
    };

    match env {
        ComputeEnvironment::Auto if std::env::var("KUBERNETES_SERVICE_HOST").is_ok() => {
            generic(builder).with_detector(Box::new(K8sResourceDetector))
        }
        ComputeEnvironment::Auto => generic(builder),
        ComputeEnvironment::Kubernetes => {
            generic(builder).with_detector(Box::new(K8sResourceDetector))
        }
        ComputeEnvironment::None => builder,
    }
}

/// Describes the Rust runtime the service was built for.
///
/// - `process.runtime.name` = "rust"
/// - `rust.target_os`, `rust.target_arch`
/// - `rust.debug` for builds with debug assertions
pub struct RustRuntimeDetector;

impl ResourceDetector for RustRuntimeDetector {
    fn detect(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes([
                KeyValue::new(PROCESS_RUNTIME_NAME, "rust"),
                KeyValue::new("rust.target_os", std::env::consts::OS),
                KeyValue::new("rust.target_arch", std::env::consts::ARCH),
                KeyValue::new("rust.debug", cfg!(debug_assertions)),
            ])
            .build()
    }
}
