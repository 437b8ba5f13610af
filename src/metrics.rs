//! Prometheus metrics for the gateway
//!
//! Cache hit/miss rates, upstream traffic and persistence counters.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Counter: cache operations by namespace and outcome
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec!(
        "castgate_cache_operations_total",
        "Cache operations by namespace and outcome",
        &["namespace", "operation"]
    )
    .expect("Failed to create cache_operations metric");

    /// Histogram: upstream request duration (seconds)
    pub static ref UPSTREAM_DURATION: HistogramVec = register_histogram_vec!(
        "castgate_upstream_duration_seconds",
        "Duration of upstream HTTP requests",
        &["upstream"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to create upstream_duration metric");

    /// Counter: upstream errors by type
    pub static ref UPSTREAM_ERRORS: CounterVec = register_counter_vec!(
        "castgate_upstream_errors_total",
        "Upstream errors by type",
        &["upstream", "error_type"]
    )
    .expect("Failed to create upstream_errors metric");

    /// Counter: retries by operation
    pub static ref RETRIES: CounterVec = register_counter_vec!(
        "castgate_retries_total",
        "Retried upstream operations",
        &["operation"]
    )
    .expect("Failed to create retries metric");

    /// Counter: rows written to the relational store
    pub static ref ROWS_WRITTEN: CounterVec = register_counter_vec!(
        "castgate_rows_written_total",
        "Rows inserted into the relational store",
        &["table", "outcome"]
    )
    .expect("Failed to create rows_written metric");
}

/// Record cache hit
pub fn record_cache_hit(namespace: &str) {
    CACHE_OPERATIONS.with_label_values(&[namespace, "hit"]).inc();
}

/// Record cache miss
pub fn record_cache_miss(namespace: &str) {
    CACHE_OPERATIONS.with_label_values(&[namespace, "miss"]).inc();
}

/// Record a swallowed cache failure
pub fn record_cache_error(namespace: &str) {
    CACHE_OPERATIONS.with_label_values(&[namespace, "error"]).inc();
}

/// Record an upstream request duration
pub fn record_upstream_duration(upstream: &str, duration_secs: f64) {
    UPSTREAM_DURATION
        .with_label_values(&[upstream])
        .observe(duration_secs);
}

/// Increment upstream error counter
pub fn record_upstream_error(upstream: &str, error_type: &str) {
    UPSTREAM_ERRORS
        .with_label_values(&[upstream, error_type])
        .inc();
}

/// Increment retry counter
pub fn record_retry(operation: &str) {
    RETRIES.with_label_values(&[operation]).inc();
}

/// Record the outcome of a chunked insert
pub fn record_rows(table: &str, inserted: usize, ignored: usize) {
    ROWS_WRITTEN
        .with_label_values(&[table, "inserted"])
        .inc_by(inserted as f64);
    ROWS_WRITTEN
        .with_label_values(&[table, "ignored"])
        .inc_by(ignored as f64);
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> crate::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| crate::GatewayError::Other(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| crate::GatewayError::Other(format!("Metrics are not UTF-8: {}", e)))
}

/// Write all metrics to `path` for a textfile collector
///
/// Written to a temporary sibling, then renamed into place.
pub fn write_metrics(path: &std::path::Path) -> crate::Result<()> {
    let text = encode_metrics()?;
    let staging = path.with_extension("prom.tmp");
    std::fs::write(&staging, text)?;
    std::fs::rename(&staging, path)?;
    Ok(())
}
