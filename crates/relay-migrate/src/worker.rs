//! Single-asset migration: classify, fetch, name, upload.

use std::sync::Arc;

use chrono::Utc;
use relay_models::{AssetMetadata, MediaAsset, MigrationOutcome, MigrationRecord};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::classify::{UrlClass, UrlClassifier};
use crate::error::{MigrationError, MigrationResult};
use crate::fetch::SourceFetcher;
use crate::logging::MigrationLogger;
use crate::metadata::blob_metadata;
use crate::metrics::record_migration;
use crate::naming::{blob_name, content_type_for_extension, extension_for};
use crate::store::BlobStore;

/// Copies one ephemeral reference into the durable store.
///
/// [`MigrationWorker::migrate`] never returns an error: every failure is
/// folded into the returned [`MigrationRecord`] and the caller's
/// reference is left untouched.
#[derive(Clone)]
pub struct MigrationWorker {
    classifier: UrlClassifier,
    fetcher: Arc<dyn SourceFetcher>,
    store: Arc<dyn BlobStore>,
    container: String,
}

struct Transferred {
    destination_url: String,
    bytes: u64,
}

impl MigrationWorker {
    pub fn new(
        classifier: UrlClassifier,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn BlobStore>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            fetcher,
            store,
            container: container.into(),
        }
    }

    pub fn classifier(&self) -> &UrlClassifier {
        &self.classifier
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Migrate a bare reference.
    pub async fn migrate(
        &self,
        source_url: &str,
        metadata: &AssetMetadata,
        cancel: &CancellationToken,
    ) -> MigrationRecord {
        let logger = MigrationLogger::from_string(&loggable_reference(source_url), "migrate");
        self.run(&logger, source_url, metadata, cancel).await
    }

    /// Migrate an asset's source reference, logging under its id.
    ///
    /// An ephemeral asset whose status cannot move to migrating fails
    /// without any network call.
    pub async fn migrate_asset(&self, asset: &MediaAsset, cancel: &CancellationToken) -> MigrationRecord {
        let logger = MigrationLogger::new(&asset.id, "migrate");

        if self.classifier.classify(&asset.source_url) == UrlClass::Ephemeral {
            if let Err(e) = asset.begin_migration() {
                logger.log_warning(&format!("cannot start transfer: {}", e));
                let record = MigrationRecord::failed(asset.source_url.clone(), e.to_string(), 0);
                record_migration(&record);
                return record;
            }
        }

        self.run(&logger, &asset.source_url, &asset.metadata, cancel).await
    }

    async fn run(
        &self,
        logger: &MigrationLogger,
        source_url: &str,
        metadata: &AssetMetadata,
        cancel: &CancellationToken,
    ) -> MigrationRecord {
        let span = logger.create_span();

        async {
            let record = match self.classifier.classify(source_url) {
                UrlClass::Durable => {
                    logger.log_progress("reference already durable, skipping");
                    MigrationRecord::skipped(source_url.to_string(), MigrationOutcome::AlreadyDurable)
                }
                UrlClass::Unrecognized => {
                    logger.log_progress("unrecognized reference, skipping");
                    MigrationRecord::skipped(source_url.to_string(), MigrationOutcome::Unrecognized)
                }
                UrlClass::Ephemeral => self.transfer_with_record(logger, source_url, metadata, cancel).await,
            };

            record_migration(&record);
            record
        }
        .instrument(span)
        .await
    }

    async fn transfer_with_record(
        &self,
        logger: &MigrationLogger,
        source_url: &str,
        metadata: &AssetMetadata,
        cancel: &CancellationToken,
    ) -> MigrationRecord {
        let started = Instant::now();
        logger.log_start(&format!("container={}", self.container));

        let mut name = None;
        let result = self.transfer(source_url, metadata, &mut name, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(done) => {
                let blob = name.unwrap_or_default();
                logger.log_completion(&format!("blob_name={} bytes={} elapsed_ms={}", blob, done.bytes, elapsed_ms));
                MigrationRecord::migrated(source_url.to_string(), done.destination_url, blob, done.bytes, elapsed_ms)
            }
            Err(err) => {
                let record = if err.is_cancelled() {
                    logger.log_warning("cancelled");
                    MigrationRecord::cancelled(source_url.to_string(), elapsed_ms)
                } else {
                    logger.log_warning(&format!("failed after {}ms: {}", elapsed_ms, err));
                    MigrationRecord::failed(source_url.to_string(), err.to_string(), elapsed_ms)
                };
                match name {
                    Some(blob) => record.with_blob_name(blob),
                    None => record,
                }
            }
        }
    }

    async fn transfer(
        &self,
        source_url: &str,
        metadata: &AssetMetadata,
        name: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> MigrationResult<Transferred> {
        if cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let fetched = self.fetcher.fetch(source_url, cancel).await?;
        if fetched.bytes.is_empty() {
            return Err(MigrationError::fetch_failed("source returned an empty body"));
        }

        let content_type = resolve_content_type(fetched.content_type.as_deref(), metadata, source_url);
        let migrated_at = Utc::now();
        let blob = blob_name(metadata, Some(&content_type), source_url, migrated_at);
        *name = Some(blob.clone());

        let size = fetched.bytes.len();
        let blob_meta = blob_metadata(metadata, &content_type, size, migrated_at);

        let destination_url = self
            .store
            .put_blob(&self.container, &blob, fetched.bytes, &content_type, &blob_meta, cancel)
            .await?;

        Ok(Transferred {
            destination_url,
            bytes: size as u64,
        })
    }
}

/// Media type of the fetched bytes, then the declared one, then a guess from the extension.
fn resolve_content_type(fetched: Option<&str>, metadata: &AssetMetadata, source_url: &str) -> String {
    fn media(raw: &str) -> Option<String> {
        let mime = raw.split(';').next()?.trim().to_ascii_lowercase();
        (mime.starts_with("image/") || mime.starts_with("video/")).then_some(mime)
    }

    fetched
        .and_then(media)
        .or_else(|| metadata.content_type.as_deref().and_then(media))
        .unwrap_or_else(|| content_type_for_extension(&extension_for(metadata, None, source_url)).to_string())
}

/// Reference with any signature stripped.
fn loggable_reference(source_url: &str) -> String {
    relay_storage::client::durable_url(source_url).unwrap_or_else(|_| "unparsed-reference".to_string())
}
