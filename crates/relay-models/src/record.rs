//! Migration results.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a single migration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// Bytes were copied to the durable store
    Migrated,
    /// Reference already pointed at the durable store
    AlreadyDurable,
    /// Reference is neither durable nor ephemeral; left alone
    Unrecognized,
    /// Fetch or upload failed
    Failed,
    /// Aborted by a cancellation signal
    Cancelled,
}

impl MigrationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationOutcome::Migrated => "migrated",
            MigrationOutcome::AlreadyDurable => "already_durable",
            MigrationOutcome::Unrecognized => "unrecognized",
            MigrationOutcome::Failed => "failed",
            MigrationOutcome::Cancelled => "cancelled",
        }
    }

    /// Whether the outcome counts as a success.
    pub fn is_success(&self) -> bool {
        matches!(self, MigrationOutcome::Migrated | MigrationOutcome::AlreadyDurable)
    }

    /// Whether bytes actually moved.
    pub fn transferred(&self) -> bool {
        matches!(self, MigrationOutcome::Migrated)
    }

    /// Whether the outcome counts against the failure totals.
    pub fn is_failure(&self) -> bool {
        matches!(self, MigrationOutcome::Failed | MigrationOutcome::Cancelled)
    }

    /// Skips are neither successes nor failures in batch totals.
    pub fn is_skip(&self) -> bool {
        matches!(self, MigrationOutcome::Unrecognized)
    }
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of migrating one source reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MigrationRecord {
    pub original_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_url: Option<String>,
    pub success: bool,
    pub outcome: MigrationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_name: Option<String>,
    /// Bytes uploaded (0 unless migrated)
    #[serde(default)]
    pub bytes: u64,
    pub finished_at: DateTime<Utc>,
}

impl MigrationRecord {
    pub fn migrated(
        original_url: String,
        destination_url: String,
        blob_name: String,
        bytes: u64,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            original_url,
            destination_url: Some(destination_url),
            success: true,
            outcome: MigrationOutcome::Migrated,
            error: None,
            elapsed_ms,
            blob_name: Some(blob_name),
            bytes,
            finished_at: Utc::now(),
        }
    }

    /// Record for a reference that was left where it is.
    ///
    /// `AlreadyDurable` keeps the original reference as its destination.
    pub fn skipped(original_url: String, outcome: MigrationOutcome) -> Self {
        let destination_url = match outcome {
            MigrationOutcome::AlreadyDurable => Some(original_url.clone()),
            _ => None,
        };
        Self {
            destination_url,
            success: outcome.is_success(),
            outcome,
            error: None,
            elapsed_ms: 0,
            blob_name: None,
            bytes: 0,
            finished_at: Utc::now(),
            original_url,
        }
    }

    pub fn failed(original_url: String, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            original_url,
            destination_url: None,
            success: false,
            outcome: MigrationOutcome::Failed,
            error: Some(error.into()),
            elapsed_ms,
            blob_name: None,
            bytes: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn cancelled(original_url: String, elapsed_ms: u64) -> Self {
        Self {
            outcome: MigrationOutcome::Cancelled,
            ..Self::failed(original_url, "migration cancelled", elapsed_ms)
        }
    }

    /// Attach the blob name a failed attempt was going to use.
    pub fn with_blob_name(mut self, blob_name: impl Into<String>) -> Self {
        self.blob_name = Some(blob_name.into());
        self
    }
}

/// Aggregate of a batch migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchResult {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    /// One record per input, in input order
    pub records: Vec<MigrationRecord>,
    pub elapsed_ms: u64,
}

impl BatchResult {
    /// Build totals from records in input order.
    pub fn from_records(records: Vec<MigrationRecord>, elapsed_ms: u64) -> Self {
        let mut result = Self {
            total: records.len(),
            elapsed_ms,
            ..Default::default()
        };
        for record in &records {
            if record.outcome.is_success() {
                result.success_count += 1;
            } else if record.outcome.is_skip() {
                result.skipped_count += 1;
            } else {
                result.failure_count += 1;
            }
        }
        result.records = records;
        result
    }

    /// Bytes moved across all records.
    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.bytes).sum()
    }
}
