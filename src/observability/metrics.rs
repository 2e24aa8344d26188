//! OpenTelemetry metrics for the batch write path.
//!
//! Key metrics:
//! - sluice_batch_enqueued_total: Counter for statements accepted by the queue
//! - sluice_batch_rejected_total: Counter for statements refused by the queue
//! - sluice_batch_statements_total: Counter for executed statements by outcome
//! - sluice_batch_dropped_total: Counter for statements lost to connection failures
//! - sluice_batch_size: Histogram of executed batch sizes
//! - sluice_batch_latency_seconds: Histogram of batch execution time

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Batch write metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Statements accepted by the queue.
    pub enqueued_total: Counter<u64>,
    /// Statements refused by the queue (full or closed).
    pub rejected_total: Counter<u64>,
    /// Executed statements, labelled by outcome.
    pub statements_total: Counter<u64>,
    /// Statements dropped because no connection could be acquired.
    pub dropped_total: Counter<u64>,
    /// Size of each executed batch.
    pub batch_size: Histogram<u64>,
    /// Wall time of each executed batch in seconds.
    pub batch_latency: Histogram<f64>,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            enqueued_total: meter
                .u64_counter("sluice_batch_enqueued_total")
                .with_description("Statements accepted by the queue")
                .with_unit("1")
                .init(),
            rejected_total: meter
                .u64_counter("sluice_batch_rejected_total")
                .with_description("Statements refused by the queue")
                .with_unit("1")
                .init(),
            statements_total: meter
                .u64_counter("sluice_batch_statements_total")
                .with_description("Executed statements by outcome")
                .with_unit("1")
                .init(),
            dropped_total: meter
                .u64_counter("sluice_batch_dropped_total")
                .with_description("Statements lost because no connection was available")
                .with_unit("1")
                .init(),
            batch_size: meter
                .u64_histogram("sluice_batch_size")
                .with_description("Statements per executed batch")
                .with_unit("1")
                .init(),
            batch_latency: meter
                .f64_histogram("sluice_batch_latency_seconds")
                .with_description("Batch execution time from acquire to release")
                .with_unit("s")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    set_manual_provider();
                }
            }
        } else {
            set_manual_provider();
        }

        let meter = global::meter("sluice-batch");
        Metrics::new(&meter)
    });
}

/// Metrics are recorded but not exported.
fn set_manual_provider() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Get the global metrics instance, if initialized.
pub fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

/// Record a statement accepted by the queue.
pub fn record_enqueued() {
    if let Some(m) = METRICS.get() {
        m.enqueued_total.add(1, &[]);
    }
}

/// Record a statement refused by the queue.
pub fn record_rejected(reason: &'static str) {
    if let Some(m) = METRICS.get() {
        m.rejected_total.add(1, &[KeyValue::new("reason", reason)]);
    }
}

/// Record a batch lost to a connection acquisition failure.
pub fn record_batch_dropped(size: usize) {
    if let Some(m) = METRICS.get() {
        m.dropped_total.add(size as u64, &[]);
    }
}

/// Record a fully attempted batch.
pub fn record_batch_executed(applied: usize, failed: usize, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        m.statements_total
            .add(applied as u64, &[KeyValue::new("outcome", "applied")]);
        m.statements_total
            .add(failed as u64, &[KeyValue::new("outcome", "failed")]);
        m.batch_size.record((applied + failed) as u64, &[]);
        m.batch_latency.record(latency_seconds, &[]);
    }
}
