use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram},
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::metrics::{
    reader::MetricReader, MeterProviderBuilder, PeriodicReader, SdkMeterProvider,
};

use std::{env, sync::Arc};
use tracing::{debug, warn};

use crate::otel::create_otlp_export_config;
use crate::probe::model::ProbeResult;

use super::resource;

fn build_meter_provider<T>(reader: T) -> SdkMeterProvider
where
    T: MetricReader,
{
    MeterProviderBuilder::default()
        .with_resource(resource())
        .with_reader(reader)
        .build()
}

pub struct MetricsState {
    pub meter: Option<SdkMeterProvider>,
    pub registry: Option<Arc<prometheus::Registry>>,
}

impl MetricsState {
    fn disabled() -> MetricsState {
        MetricsState {
            meter: None,
            registry: None,
        }
    }
}

pub fn initialize() -> MetricsState {
    let (meter_provider, prometheus_registry) =
        match env::var("OTEL_METRICS_EXPORTER").ok().as_deref() {
            Some("otlp") => {
                debug!("Using OTLP metrics exporter");
                let export_config = create_otlp_export_config();
                let exporter = match export_config.protocol {
                    opentelemetry_otlp::Protocol::Grpc => {
                        debug!("Using OTLP gRPC exporter");
                        MetricExporter::builder()
                            .with_tonic()
                            .with_export_config(export_config)
                            .build()
                    }
                    _ => {
                        debug!("Using OTLP HTTP exporter");
                        let base_endpoint = export_config
                            .endpoint
                            .clone()
                            .unwrap_or_else(|| "http://localhost:4318".to_string());
                        MetricExporter::builder()
                            .with_http()
                            .with_export_config(export_config)
                            .with_endpoint(format!(
                                "{}/v1/metrics",
                                base_endpoint.trim_end_matches('/')
                            ))
                            .build()
                    }
                };
                let exporter = match exporter {
                    Ok(exporter) => exporter,
                    Err(e) => {
                        warn!(error = %e, "Failed to build OTLP metrics exporter, metrics disabled");
                        return MetricsState::disabled();
                    }
                };
                let reader = PeriodicReader::builder(exporter).build();
                (build_meter_provider(reader), None)
            }
            Some("stdout") => {
                debug!("Using stdout metrics exporter");
                let exporter = opentelemetry_stdout::MetricExporter::default();
                let reader = PeriodicReader::builder(exporter).build();
                (build_meter_provider(reader), None)
            }
            Some("prometheus") => {
                debug!("Using Prometheus metrics exporter");
                let registry = prometheus::Registry::new();
                let reader = match opentelemetry_prometheus::exporter()
                    .with_registry(registry.clone())
                    .build()
                {
                    Ok(reader) => reader,
                    Err(e) => {
                        warn!(error = %e, "Failed to build Prometheus exporter, metrics disabled");
                        return MetricsState::disabled();
                    }
                };
                (build_meter_provider(reader), Some(Arc::new(registry)))
            }
            _ => {
                debug!("No metrics exporter configured");
                return MetricsState::disabled();
            }
        };

    global::set_meter_provider(meter_provider.clone());

    MetricsState {
        meter: Some(meter_provider),
        registry: prometheus_registry,
    }
}

/// Instruments recorded for every published check, keyed by `url`.
pub struct Metrics {
    pub duration: Histogram<u64>,
    pub runs: Counter<u64>,
    pub errors: Counter<u64>,
    pub status: Gauge<u64>,
    pub http_status_code: Gauge<u64>,
    pub certificate_days_remaining: Gauge<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Ok = 0,
    Error = 1,
}

impl MonitorStatus {
    pub fn as_u64(&self) -> u64 {
        *self as u64
    }
}

impl From<bool> for MonitorStatus {
    fn from(success: bool) -> Self {
        if success {
            MonitorStatus::Ok
        } else {
            MonitorStatus::Error
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Metrics {
        let meter = global::meter("webchecker");
        Metrics {
            duration: meter
                .u64_histogram("duration")
                .with_unit("ms")
                .with_description("probe duration histogram in milliseconds")
                .build(),
            runs: meter
                .u64_counter("runs")
                .with_description("the total count of checks by target")
                .build(),
            errors: meter
                .u64_counter("errors")
                .with_description("the total number of failed checks by target")
                .build(),
            status: meter
                .u64_gauge("status")
                .with_description("the current status of each target OK = 0 Error = 1")
                .build(),
            http_status_code: meter
                .u64_gauge("http_status_code")
                .with_description(
                    "the current HTTP status code of the target, 0 if the HTTP call fails",
                )
                .build(),
            certificate_days_remaining: meter
                .i64_gauge("certificate_days_remaining")
                .with_unit("d")
                .with_description("days until the target's TLS certificate expires")
                .build(),
        }
    }

    pub fn record(&self, result: &ProbeResult) {
        let attributes = [KeyValue::new("url", result.url.clone())];
        let status = MonitorStatus::from(result.success);

        self.runs.add(1, &attributes);
        self.duration
            .record(result.latency.as_millis() as u64, &attributes);
        self.status.record(status.as_u64(), &attributes);
        self.http_status_code
            .record(result.status_code.unwrap_or(0) as u64, &attributes);
        if status == MonitorStatus::Error {
            self.errors.add(1, &attributes);
        }
        if let Some(certificate) = &result.certificate {
            self.certificate_days_remaining
                .record(certificate.days_until_expiry, &attributes);
        }
    }
}
