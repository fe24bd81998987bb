//! Metrics collection for operations-service.
//!
//! HTTP metrics go through the `metrics` facade installed by service-core;
//! domain counters live in a dedicated Prometheus registry appended to the
//! `/metrics` output.

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub struct OperationsMetrics {
    registry: Registry,
    invoices_generated: IntCounterVec,
    due_invoice_runs: IntCounter,
    availability_requests: IntCounterVec,
    invoice_notifications: IntCounterVec,
    store_query_duration: HistogramVec,
}

static OPERATIONS_METRICS: OnceLock<Option<OperationsMetrics>> = OnceLock::new();

impl OperationsMetrics {
    fn build() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let invoices_generated = IntCounterVec::new(
            Opts::new(
                "invoices_generated_total",
                "Monthly invoice generation attempts by outcome",
            ),
            &["outcome"],
        )?;
        let due_invoice_runs = IntCounter::new(
            "due_invoice_runs_total",
            "Completed due-invoice batch runs",
        )?;
        let availability_requests = IntCounterVec::new(
            Opts::new(
                "availability_requests_total",
                "Availability computations by external calendar outcome",
            ),
            &["calendar"],
        )?;
        let invoice_notifications = IntCounterVec::new(
            Opts::new(
                "invoice_notifications_total",
                "Invoice email notifications by outcome",
            ),
            &["outcome"],
        )?;
        let store_query_duration = HistogramVec::new(
            HistogramOpts::new(
                "store_query_duration_seconds",
                "Store operation latency in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;

        registry.register(Box::new(invoices_generated.clone()))?;
        registry.register(Box::new(due_invoice_runs.clone()))?;
        registry.register(Box::new(availability_requests.clone()))?;
        registry.register(Box::new(invoice_notifications.clone()))?;
        registry.register(Box::new(store_query_duration.clone()))?;

        Ok(Self {
            registry,
            invoices_generated,
            due_invoice_runs,
            availability_requests,
            invoice_notifications,
            store_query_duration,
        })
    }
}

/// Install the HTTP recorder and the domain registry. Idempotent.
pub fn init_metrics() {
    service_core::observability::init_metrics();
    OPERATIONS_METRICS.get_or_init(|| match OperationsMetrics::build() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            tracing::warn!(error = %e, "Operations metrics registry not initialized");
            None
        }
    });
}

fn metrics() -> Option<&'static OperationsMetrics> {
    OPERATIONS_METRICS.get().and_then(Option::as_ref)
}

pub fn record_invoice_generation(outcome: &str) {
    if let Some(m) = metrics() {
        m.invoices_generated.with_label_values(&[outcome]).inc();
    }
}

pub fn record_due_invoice_run() {
    if let Some(m) = metrics() {
        m.due_invoice_runs.inc();
    }
}

pub fn record_availability_request(calendar_outcome: &str) {
    if let Some(m) = metrics() {
        m.availability_requests
            .with_label_values(&[calendar_outcome])
            .inc();
    }
}

pub fn record_notification(outcome: &str) {
    if let Some(m) = metrics() {
        m.invoice_notifications.with_label_values(&[outcome]).inc();
    }
}

pub fn observe_store_query(operation: &str, seconds: f64) {
    if let Some(m) = metrics() {
        m.store_query_duration
            .with_label_values(&[operation])
            .observe(seconds);
    }
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = service_core::observability::render_metrics();

    if let Some(m) = metrics() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = m.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}
