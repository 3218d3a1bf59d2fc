//! Storage metrics collection.
//!
//! Provides standardized metrics for monitoring storage operations:
//! - Request counters by operation and outcome
//! - Latency histograms
//! - Retry and circuit-rejection counters

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total storage attempts by operation and outcome.
    pub const REQUESTS_TOTAL: &str = "relay_storage_requests_total";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "relay_storage_retries_total";

    /// Attempt latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "relay_storage_latency_seconds";

    /// Calls rejected by an open circuit, by operation.
    pub const CIRCUIT_REJECTIONS_TOTAL: &str = "relay_storage_circuit_rejections_total";
}

/// Record metrics for a completed storage attempt.
pub fn record_request(operation: &str, status: &str, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a call rejected without I/O because the circuit is open.
pub fn record_circuit_rejection(operation: &str) {
    counter!(
        names::CIRCUIT_REJECTIONS_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}
