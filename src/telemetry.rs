//! OpenTelemetry tracing export
//!
//! Spans emitted through `tracing` are exported over OTLP/gRPC when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace, Resource};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

use crate::error::{Error, Result};

/// Service name reported with every exported span
pub const SERVICE_NAME: &str = "mesh-failover-operator";

/// Default collector endpoint when the variable is set but empty
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Build a tracing layer exporting spans to the OTLP collector
pub fn init_telemetry<S>() -> Result<OpenTelemetryLayer<S, trace::Tracer>>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());

    let resource = Resource::new(vec![
        KeyValue::new("service.name", SERVICE_NAME),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(trace::config().with_resource(resource))
        .install_batch(runtime::Tokio)
        .map_err(|e| Error::ConfigError(format!("failed to install OTLP exporter: {}", e)))?;

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Flush pending spans
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
