use anyhow::Result;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::env;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_OTLP_HTTP_ENDPOINT: &str = "http://localhost:4318/v1/traces";

/// Installs the global tracing subscriber. Spans are additionally exported
/// over OTLP/HTTP when `OTEL_TRACES_EXPORTER=otlp`.
pub fn init_telemetry(service_name: &'static str) {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otlp_enabled = env::var("OTEL_TRACES_EXPORTER")
        .map(|v| v == "otlp")
        .unwrap_or(false);

    let otel = if otlp_enabled {
        let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OTLP_HTTP_ENDPOINT.to_string());
        match create_otlp_tracer(&endpoint, service_name) {
            Ok(tracer) => Some(OpenTelemetryLayer::new(tracer)),
            Err(e) => {
                eprintln!("failed to initialize OTLP tracer for {service_name}: {e}");
                None
            }
        }
    } else {
        None
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{service_name}=info")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(otel)
        .init();
}

fn create_otlp_tracer(
    endpoint: &str,
    service_name: &'static str,
) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_simple_exporter(exporter)
        .build();

    Ok(provider.tracer(service_name))
}
