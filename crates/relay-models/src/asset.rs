//! Media asset models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::record::MigrationRecord;
use crate::status::{AssetStatus, StatusTransitionError};

/// Unique identifier for a generated asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    /// Generate a new random asset ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AssetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Descriptive metadata captured at generation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssetMetadata {
    /// Prompt used for generation
    #[serde(default)]
    pub prompt: String,
    /// Model name/version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Generation seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// When the provider produced the asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    /// Original filename reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// MIME type reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Generation provider (e.g. "firefly", "luma")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Provider-specific fields carried through untouched
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Where a migrated asset came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MigrationInfo {
    /// Reference the asset had before migration
    pub original_url: String,
    /// Durable reference the asset points at now
    pub destination_url: String,
    /// Blob name in the durable store
    pub blob_name: String,
    /// When the migration finished
    pub migrated_at: DateTime<Utc>,
}

/// A generated media asset as owned by the calling application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaAsset {
    pub id: AssetId,
    /// Reference used to display/fetch the asset
    pub source_url: String,
    /// Separate download reference, if the provider gave one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default)]
    pub metadata: AssetMetadata,
    #[serde(default)]
    pub status: AssetStatus,
    /// Set once the asset has been moved to the durable store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration: Option<MigrationInfo>,
}

impl MediaAsset {
    /// Create a pending asset.
    pub fn new(id: impl Into<AssetId>, source_url: impl Into<String>, metadata: AssetMetadata) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            download_url: None,
            metadata,
            status: AssetStatus::Pending,
            migration: None,
        }
    }

    /// Copy of this asset marked as migrating.
    pub fn begin_migration(&self) -> Result<Self, StatusTransitionError> {
        let mut next = self.clone();
        next.status.transition(AssetStatus::Migrating)?;
        Ok(next)
    }

    /// Copy of this asset with the outcome of `record` applied.
    ///
    /// On success the source and download references are replaced by the
    /// durable URL and the original reference is kept in [`MigrationInfo`].
    /// On failure only the status changes. Records that moved nothing
    /// (already durable, skipped) return the asset unchanged.
    pub fn with_migration(&self, record: &MigrationRecord) -> Result<Self, StatusTransitionError> {
        if !record.outcome.transferred() && !record.outcome.is_failure() {
            return Ok(self.clone());
        }

        let mut next = match self.status {
            AssetStatus::Pending => self.begin_migration()?,
            _ => self.clone(),
        };

        match (&record.destination_url, &record.blob_name) {
            (Some(destination), Some(blob_name)) if record.success => {
                next.status.transition(AssetStatus::Migrated)?;
                next.migration = Some(MigrationInfo {
                    original_url: self.source_url.clone(),
                    destination_url: destination.clone(),
                    blob_name: blob_name.clone(),
                    migrated_at: record.finished_at,
                });
                next.source_url = destination.clone();
                next.download_url = Some(destination.clone());
            }
            _ => {
                next.status.transition(AssetStatus::Failed)?;
            }
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MigrationOutcome;

    fn asset() -> MediaAsset {
        MediaAsset::new(
            "asset-1",
            "https://cdn.provider.example/a.png?sig=abc",
            AssetMetadata {
                prompt: "A red fox".into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_asset_id_display() {
        let id = AssetId::from_string("abc");
        assert_eq!(id.to_string(), "abc");
        assert_eq!(AssetId::new().as_str().len(), 36);
    }

    #[test]
    fn test_begin_migration_only_from_pending() {
        let started = asset().begin_migration().unwrap();
        assert_eq!(started.status, AssetStatus::Migrating);
        assert_eq!(started.source_url, asset().source_url);

        let err = started.begin_migration().unwrap_err();
        assert_eq!(err.from, AssetStatus::Migrating);
        assert_eq!(err.to, AssetStatus::Migrating);
    }

    #[test]
    fn test_with_migration_success_rewrites_urls() {
        let original = asset();
        let record = MigrationRecord::migrated(
            original.source_url.clone(),
            "https://store.example/assets/a-fox.png".into(),
            "a-fox.png".into(),
            1024,
            12,
        );

        let updated = original.with_migration(&record).unwrap();
        assert_eq!(updated.status, AssetStatus::Migrated);
        assert_eq!(updated.source_url, "https://store.example/assets/a-fox.png");
        assert_eq!(updated.download_url.as_deref(), Some("https://store.example/assets/a-fox.png"));

        let info = updated.migration.unwrap();
        assert_eq!(info.original_url, original.source_url);
        assert_eq!(info.blob_name, "a-fox.png");

        // caller's copy is untouched
        assert_eq!(original.status, AssetStatus::Pending);
    }

    #[test]
    fn test_with_migration_failure_keeps_reference() {
        let original = asset();
        let record = MigrationRecord::failed(original.source_url.clone(), "boom", 3);

        let updated = original.with_migration(&record).unwrap();
        assert_eq!(updated.status, AssetStatus::Failed);
        assert_eq!(updated.source_url, original.source_url);
        assert!(updated.migration.is_none());
    }

    #[test]
    fn test_with_migration_skip_is_noop() {
        let original = asset();
        let record = MigrationRecord::skipped(original.source_url.clone(), MigrationOutcome::AlreadyDurable);
        assert_eq!(original.with_migration(&record).unwrap(), original);
    }

    #[test]
    fn test_with_migration_rejects_terminal_asset() {
        let mut migrated = asset();
        migrated.status = AssetStatus::Migrated;
        let record = MigrationRecord::failed(migrated.source_url.clone(), "boom", 3);
        assert!(migrated.with_migration(&record).is_err());
    }

    #[test]
    fn test_metadata_deserializes_with_defaults() {
        let asset: MediaAsset = serde_json::from_str(
            r#"{"id":"x","source_url":"https://a.example/b.png","metadata":{"prompt":"p"}}"#,
        )
        .unwrap();
        assert_eq!(asset.status, AssetStatus::Pending);
        assert!(asset.metadata.model.is_none());
        assert!(asset.metadata.extra.is_empty());
    }
}
