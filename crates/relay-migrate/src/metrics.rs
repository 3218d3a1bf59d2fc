//! Migration metrics.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use relay_models::MigrationRecord;

/// Install the Prometheus recorder for this process.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub mod names {
    /// Finished migrations by outcome.
    pub const MIGRATIONS_TOTAL: &str = "relay_migrations_total";

    /// Bytes copied into durable storage.
    pub const MIGRATION_BYTES_TOTAL: &str = "relay_migration_bytes_total";

    /// End-to-end migration time in seconds.
    pub const MIGRATION_DURATION_SECONDS: &str = "relay_migration_duration_seconds";

    /// Items waiting in the background queue.
    pub const QUEUE_DEPTH: &str = "relay_migration_queue_depth";
}

/// Record one finished migration.
pub fn record_migration(record: &MigrationRecord) {
    counter!(
        names::MIGRATIONS_TOTAL,
        "outcome" => record.outcome.as_str()
    )
    .increment(1);

    if record.bytes > 0 {
        counter!(names::MIGRATION_BYTES_TOTAL).increment(record.bytes);
    }

    if record.outcome.transferred() || record.outcome.is_failure() {
        histogram!(
            names::MIGRATION_DURATION_SECONDS,
            "outcome" => record.outcome.as_str()
        )
        .record(record.elapsed_ms as f64 / 1000.0);
    }
}

pub fn record_queue_depth(depth: usize) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}
