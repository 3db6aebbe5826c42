//! OTLP metrics implementation.
//!
//! Key metrics:
//! - price_throttler_dispatch_total: Counter for updates fanned out
//! - price_throttler_coalesced_total: Counter for superseded, never-delivered values
//! - price_throttler_delivered_total: Counter for successful subscriber callbacks
//! - price_throttler_delivery_failures_total: Counter for failed callbacks
//! - price_throttler_drain_size: Histogram of prices delivered per drain
//! - price_throttler_active_subscriptions: Gauge for live registrations

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Throttler metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of updates accepted by a dispatcher.
    pub dispatch_total: Counter<u64>,
    /// Values overwritten in a pending buffer before delivery.
    pub coalesced_total: Counter<u64>,
    /// Successful `on_price` invocations.
    pub delivered_total: Counter<u64>,
    /// Failed or panicked `on_price` invocations.
    pub delivery_failures_total: Counter<u64>,
    /// Number of prices handed to a subscriber per drain.
    pub drain_size: Histogram<u64>,
    /// Live subscription count.
    pub active_subscriptions: Gauge<i64>,
}

impl Metrics {
    /// Create a new metrics registry from a meter.
    fn new(meter: &Meter) -> Self {
        Self {
            dispatch_total: meter
                .u64_counter("price_throttler_dispatch_total")
                .with_description("Total number of price updates dispatched")
                .with_unit("1")
                .init(),
            coalesced_total: meter
                .u64_counter("price_throttler_coalesced_total")
                .with_description("Pending prices superseded before delivery")
                .with_unit("1")
                .init(),
            delivered_total: meter
                .u64_counter("price_throttler_delivered_total")
                .with_description("Prices delivered to subscribers")
                .with_unit("1")
                .init(),
            delivery_failures_total: meter
                .u64_counter("price_throttler_delivery_failures_total")
                .with_description("Subscriber callbacks that failed or panicked")
                .with_unit("1")
                .init(),
            drain_size: meter
                .u64_histogram("price_throttler_drain_size")
                .with_description("Prices delivered per drain cycle")
                .with_unit("1")
                .init(),
            active_subscriptions: meter
                .i64_gauge("price_throttler_active_subscriptions")
                .with_description("Number of live subscriptions")
                .with_unit("1")
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
                    install_manual_reader();
                }
            }
        } else {
            // Metrics are recorded but not exported
            install_manual_reader();
        }

        let meter = global::meter("price_throttler");
        Metrics::new(&meter)
    });
}

fn install_manual_reader() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Get the global metrics instance.
///
/// Panics if metrics have not been initialized.
pub fn metrics() -> &'static Metrics {
    METRICS
        .get()
        .expect("metrics not initialized - call init_metrics() first")
}

/// Record one update accepted for fan-out to `fanout` runners.
pub fn record_dispatch(symbol: &str, fanout: usize) {
    if let Some(m) = METRICS.get() {
        let attrs = [
            KeyValue::new("symbol", symbol.to_string()),
            KeyValue::new("fanout", fanout as i64),
        ];
        m.dispatch_total.add(1, &attrs);
    }
}

/// Record a pending value superseded before delivery.
///
/// Per-subscription counts live in `RunnerStats`; labelling by id here would
/// grow one series per subscription ever created.
pub fn record_coalesced() {
    if let Some(m) = METRICS.get() {
        m.coalesced_total.add(1, &[]);
    }
}

/// Record the outcome of one drain cycle.
pub fn record_drain(delivered: u64, failed: u64) {
    if let Some(m) = METRICS.get() {
        m.delivered_total.add(delivered, &[]);
        if failed > 0 {
            m.delivery_failures_total.add(failed, &[]);
        }
        m.drain_size.record(delivered + failed, &[]);
    }
}

/// Record the live subscription count.
pub fn record_active_subscriptions(count: usize) {
    if let Some(m) = METRICS.get() {
        m.active_subscriptions
            .record(i64::try_from(count).unwrap_or(i64::MAX), &[]);
    }
}
