//! OpenTelemetry trace export
//!
//! Spans from `tracing` are exported over OTLP (gRPC) to the collector named
//! by `OTEL_EXPORTER_OTLP_ENDPOINT`.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

use crate::error::Result;

/// Service name reported on exported spans
pub const SERVICE_NAME: &str = "cluster-features";

/// Environment variable naming the OTLP collector
pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Build the OTLP pipeline towards `endpoint` and return a `tracing` layer
/// feeding it.
///
/// The subscriber argument only pins the layer's type to the registry it
/// will be stacked on.
pub fn init_telemetry<S>(_subscriber: &S, endpoint: &str) -> Result<OpenTelemetryLayer<S, Tracer>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let mut attributes = vec![
        KeyValue::new("service.name", SERVICE_NAME),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    if let Ok(node) = std::env::var("NODE_NAME") {
        attributes.push(KeyValue::new("k8s.node.name", node));
    }

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(trace::config().with_resource(Resource::new(attributes)))
        .install_batch(runtime::Tokio)?;

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Flush pending spans and stop the exporter
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
