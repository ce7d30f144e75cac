//! Tracing and OpenTelemetry initialization.
//!
//! Operator-facing logs always go to stderr. When an OTLP endpoint is
//! configured, traces, metrics and logs are also exported there, tagged
//! with the tagger's resource attributes.

pub mod batch;
pub mod metrics;

use crate::error::{Error, Result};
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

const TRACER_NAME: &str = "workflow-tagger";

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint (e.g. "http://localhost:4317"). `None` keeps
    /// everything local.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset (e.g. "info", "debug").
    pub default_filter: String,
    /// Exported as `tagger.dry_run` so rehearsal runs can be told apart.
    pub dry_run: bool,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            service_name: service_name.into(),
            default_filter: "info".to_string(),
            dry_run: false,
        }
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes([
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("tagger.dry_run", self.dry_run),
            ])
            .build()
    }
}

/// The three OTLP pipelines, built together or not at all.
struct OtlpProviders {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl OtlpProviders {
    fn build(endpoint: &str, resource: Resource) -> Result<Self> {
        use opentelemetry_otlp::WithExportConfig as _;

        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| Error::Other(format!("failed to create OTLP span exporter: {e}")))?;
        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| Error::Other(format!("failed to create OTLP metric exporter: {e}")))?;
        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| Error::Other(format!("failed to create OTLP log exporter: {e}")))?;

        Ok(Self {
            tracer: SdkTracerProvider::builder()
                .with_batch_exporter(spans)
                .with_resource(resource.clone())
                .build(),
            meter: SdkMeterProvider::builder()
                .with_periodic_exporter(metrics)
                .with_resource(resource.clone())
                .build(),
            logger: SdkLoggerProvider::builder()
                .with_batch_exporter(logs)
                .with_resource(resource)
                .build(),
        })
    }

    fn shutdown(self) {
        // Logs first so records emitted while spans close are still exported.
        let _ = self.logger.shutdown();
        let _ = self.meter.shutdown();
        let _ = self.tracer.shutdown();
    }
}

/// Flushes and shuts down the OTLP pipelines on drop. Hold it for the
/// lifetime of the process.
pub struct TelemetryGuard {
    otlp: Option<OtlpProviders>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(providers) = self.otlp.take() {
            providers.shutdown();
        }
    }
}

/// Install the global tracing subscriber (and meter provider, when exporting).
///
/// # Errors
///
/// Fails if an OTLP exporter cannot be built or a global subscriber is
/// already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let otlp = config
        .endpoint
        .as_deref()
        .map(|endpoint| OtlpProviders::build(endpoint, config.resource()))
        .transpose()?;

    if let Some(providers) = &otlp {
        opentelemetry::global::set_meter_provider(providers.meter.clone());
    }
    let trace_layer = otlp.as_ref().map(|providers| {
        tracing_opentelemetry::layer().with_tracer(providers.tracer.tracer(TRACER_NAME))
    });
    let log_layer = otlp.as_ref().map(|providers| {
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&providers.logger)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .with(trace_layer)
        .with(log_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    Ok(TelemetryGuard { otlp })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::{Key, Value};

    #[test]
    fn resource_carries_service_and_run_mode() {
        let mut config = TelemetryConfig::new("tagger-test");
        config.dry_run = true;

        let resource = config.resource();

        assert_eq!(
            resource.get(&Key::from_static_str("service.name")),
            Some(Value::from("tagger-test"))
        );
        assert_eq!(
            resource.get(&Key::from_static_str("tagger.dry_run")),
            Some(Value::Bool(true))
        );
        assert!(resource.get(&Key::from_static_str("service.version")).is_some());
    }
}
