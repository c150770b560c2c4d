//! Metrics collection and Prometheus export.
//!
//! Installs the Prometheus recorder and renders the /metrics payload.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the recorder and register metric descriptions.
///
/// Safe to call more than once; later calls are no-ops. Integration tests
/// build several applications in one process.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| {
        let handle = match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "Global recorder already set, using a detached one");
                PrometheusBuilder::new().build_recorder().handle()
            }
        };
        describe();
        handle
    });
}

fn describe() {
    describe_counter!(
        "document_uploads_total",
        "Documents accepted by the upload endpoint"
    );
    describe_counter!(
        "document_conversion_total",
        "Finished conversion attempts, labelled by outcome"
    );
    describe_histogram!(
        "document_conversion_duration_seconds",
        Unit::Seconds,
        "Wall time of successful conversions"
    );
    describe_gauge!(
        "document_queue_depth",
        "Document ids waiting in the dispatch queue"
    );
    describe_counter!(
        "documents_reaped_total",
        "PROCESSING documents failed by the reaper"
    );
    describe_counter!("http_requests_total", "HTTP requests served");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request latency"
    );
}

/// Get the current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}
