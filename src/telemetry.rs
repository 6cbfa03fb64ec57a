//! OpenTelemetry initialization and utilities.
//!
//! Sets up distributed tracing with OTLP export, gated on
//! `OTEL_EXPORTER_OTLP_ENDPOINT` being present so a plain `tracing`
//! stdout subscriber is all either binary needs in the common case.

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    runtime,
    trace::{self, Sampler},
    Resource,
};
use std::env;
use tracing_subscriber::{registry::LookupSpan, Layer};

pub fn init_telemetry<S>(_subscriber: &S, service_name: &'static str) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
{
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otlp_endpoint =
        env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|_| "http://localhost:4317".to_string());

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let exporter = opentelemetry_otlp::new_exporter().tonic().with_endpoint(&otlp_endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(trace::config().with_resource(resource).with_sampler(Sampler::AlwaysOn))
        .install_batch(runtime::Tokio)
        .expect("failed to initialize OpenTelemetry tracer");

    tracing_opentelemetry::layer().with_tracer(tracer).boxed()
}

pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
