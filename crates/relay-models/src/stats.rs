//! Reporting snapshots.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Queue and lifetime counters of the migration orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MigrationStats {
    pub queue_length: usize,
    pub is_processing: bool,
    pub total_migrated: u64,
    pub total_failed: u64,
    pub total_bytes: u64,
}

/// Summary of what a container holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ContainerStats {
    pub blob_count: u64,
    pub total_bytes: u64,
    /// `YYYY-MM-DD` -> number of blobs migrated that day
    pub migrations_by_date: BTreeMap<String, u64>,
}

impl ContainerStats {
    /// Fold one blob into the totals.
    pub fn add_blob(&mut self, size: u64, day: Option<String>) {
        self.blob_count += 1;
        self.total_bytes += size;
        if let Some(day) = day {
            *self.migrations_by_date.entry(day).or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_stats_accumulates() {
        let mut stats = ContainerStats::default();
        stats.add_blob(10, Some("2024-05-01".into()));
        stats.add_blob(5, Some("2024-05-01".into()));
        stats.add_blob(1, None);

        assert_eq!(stats.blob_count, 3);
        assert_eq!(stats.total_bytes, 16);
        assert_eq!(stats.migrations_by_date.get("2024-05-01"), Some(&2));
    }
}
