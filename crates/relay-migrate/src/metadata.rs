//! Descriptive metadata stored alongside a migrated blob.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use relay_models::AssetMetadata;

/// Value of the `source` key on every migrated blob.
pub const MIGRATION_SOURCE: &str = "ai-generation-migration";

/// Build the blob metadata map. Empty optional fields are left out.
pub fn blob_metadata(
    metadata: &AssetMetadata,
    content_type: &str,
    size: usize,
    migrated_at: DateTime<Utc>,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();

    if !metadata.prompt.is_empty() {
        out.insert("original_prompt".to_string(), metadata.prompt.clone());
    }
    if let Some(model) = &metadata.model {
        out.insert("model".to_string(), model.clone());
    }
    if let Some(seed) = metadata.seed {
        out.insert("seed".to_string(), seed.to_string());
    }
    if let Some(generated_at) = metadata.generated_at {
        out.insert(
            "generated_at".to_string(),
            generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    if let Some(provider) = &metadata.provider {
        out.insert("provider".to_string(), provider.clone());
    }
    if let Some(filename) = &metadata.filename {
        out.insert("original_filename".to_string(), filename.clone());
    }

    out.insert(
        "migrated_at".to_string(),
        migrated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    out.insert("content_type".to_string(), content_type.to_string());
    out.insert("file_size".to_string(), size.to_string());
    out.insert("source".to_string(), MIGRATION_SOURCE.to_string());

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_full_metadata() {
        let generated = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let migrated = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let meta = AssetMetadata {
            prompt: "a red fox".into(),
            model: Some("firefly-v3".into()),
            seed: Some(42),
            generated_at: Some(generated),
            filename: Some("fox.png".into()),
            provider: Some("firefly".into()),
            ..Default::default()
        };

        let out = blob_metadata(&meta, "image/png", 2048, migrated);
        assert_eq!(out["original_prompt"], "a red fox");
        assert_eq!(out["model"], "firefly-v3");
        assert_eq!(out["seed"], "42");
        assert_eq!(out["generated_at"], "2024-05-01T09:00:00.000Z");
        assert_eq!(out["migrated_at"], "2024-05-01T10:00:00.000Z");
        assert_eq!(out["original_filename"], "fox.png");
        assert_eq!(out["file_size"], "2048");
        assert_eq!(out["source"], MIGRATION_SOURCE);
    }

    #[test]
    fn test_sparse_metadata() {
        let out = blob_metadata(&AssetMetadata::default(), "image/jpeg", 1, Utc::now());
        assert!(!out.contains_key("original_prompt"));
        assert!(!out.contains_key("seed"));
        assert_eq!(out["content_type"], "image/jpeg");
    }
}
