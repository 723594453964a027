pub mod metrics;
pub mod tracing;

use std::env;

use opentelemetry_otlp::{ExportConfig, Protocol};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::EnvFilter;

use self::metrics::MetricsState;

pub struct OtelState {
    pub metrics: MetricsState,
    pub tracer: SdkTracerProvider,
}

impl OtelState {
    /// Flushes pending spans and metrics before exit.
    pub fn shutdown(&self) {
        if let Err(e) = self.tracer.shutdown() {
            ::tracing::debug!(error = %e, "Tracer provider shutdown failed");
        }
        if let Some(meter) = &self.metrics.meter {
            if let Err(e) = meter.shutdown() {
                ::tracing::debug!(error = %e, "Meter provider shutdown failed");
            }
        }
    }
}

/// Sets up log output (`RUST_LOG`, `info` by default) and the OpenTelemetry
/// tracer and meter providers.
pub fn init() -> OtelState {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let tracer = self::tracing::create_tracer();
    let metrics = metrics::initialize();
    OtelState { metrics, tracer }
}

pub(crate) fn resource() -> Resource {
    Resource::builder().with_service_name("webchecker").build()
}

pub(crate) fn create_otlp_export_config() -> ExportConfig {
    ExportConfig {
        endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        protocol: protocol_from_env(env::var("OTEL_EXPORTER_OTLP_PROTOCOL").ok().as_deref()),
        ..Default::default()
    }
}

fn protocol_from_env(value: Option<&str>) -> Protocol {
    match value {
        Some("grpc") => Protocol::Grpc,
        Some("http/json") => Protocol::HttpJson,
        _ => Protocol::HttpBinary,
    }
}
