//! Migration policy: which assets move, and whether callers wait for it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relay_models::{AssetStatus, BatchResult, MediaAsset, MigrationOutcome, MigrationRecord, MigrationStats};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{MigrationConfig, MigrationMode};
use crate::error::{MigrationError, MigrationResult};
use crate::queue::{CompletionCallback, MigrationQueue, QueueCompletion};
use crate::store::BlobStore;
use crate::worker::MigrationWorker;

/// Receives assets rewritten by the background queue.
pub trait AssetUpdateSink: Send + Sync {
    fn asset_updated(&self, asset: &MediaAsset, record: &MigrationRecord);
}

/// Entry point for callers that own media assets.
pub struct MigrationIntegration {
    worker: MigrationWorker,
    queue: MigrationQueue,
    store: Arc<dyn BlobStore>,
    mode: MigrationMode,
    auto_migration: AtomicBool,
    max_concurrent: usize,
}

/// Copy of `asset` that may start a new migration.
fn prepared(asset: &MediaAsset) -> MediaAsset {
    let mut working = asset.clone();
    if working.status == AssetStatus::Failed {
        working.status.reset();
    }
    working
}

impl MigrationIntegration {
    pub fn new(
        worker: MigrationWorker,
        store: Arc<dyn BlobStore>,
        config: &MigrationConfig,
        sink: Option<Arc<dyn AssetUpdateSink>>,
    ) -> Self {
        let callback = sink.map(|sink| -> CompletionCallback {
            Arc::new(move |done: QueueCompletion| sink.asset_updated(&done.asset, &done.record))
        });
        let queue = MigrationQueue::new(worker.clone(), config.max_concurrent, callback);

        Self {
            worker,
            queue,
            store,
            mode: config.mode,
            auto_migration: AtomicBool::new(config.auto_migration),
            max_concurrent: config.max_concurrent.max(1),
        }
    }

    /// Make sure the destination container exists. Never fails.
    pub async fn initialize(&self, cancel: &CancellationToken) -> bool {
        let container = self.worker.container();
        match self.store.ensure_container(container, cancel).await {
            Ok(created) => {
                info!(container = %container, created, "Migration storage ready");
                true
            }
            Err(e) => {
                error!(container = %container, "Failed to prepare migration storage: {}", e);
                false
            }
        }
    }

    pub fn mode(&self) -> MigrationMode {
        self.mode
    }

    pub fn auto_migration_enabled(&self) -> bool {
        self.auto_migration.load(Ordering::Relaxed)
    }

    pub fn set_auto_migration(&self, enabled: bool) {
        self.auto_migration.store(enabled, Ordering::Relaxed);
        info!(enabled, "Auto-migration toggled");
    }

    pub fn queue(&self) -> &MigrationQueue {
        &self.queue
    }

    pub fn worker(&self) -> &MigrationWorker {
        &self.worker
    }

    /// Migrate one asset and wait for it.
    ///
    /// This is the only path that surfaces a failure; callers are expected
    /// to keep using the original asset when it does.
    pub async fn migrate(&self, asset: &MediaAsset, cancel: &CancellationToken) -> MigrationResult<MediaAsset> {
        let working = prepared(asset);
        let record = self.worker.migrate_asset(&working, cancel).await;
        self.queue.count(&record);

        if record.outcome.is_failure() {
            if record.outcome == MigrationOutcome::Cancelled {
                return Err(MigrationError::Cancelled);
            }
            return Err(MigrationError::migration_failed(
                record.error.unwrap_or_else(|| "unknown failure".to_string()),
            ));
        }

        Ok(working.with_migration(&record)?)
    }

    /// Apply the migration policy to a newly created asset.
    ///
    /// The returned asset is usable immediately: rewritten in sync mode
    /// when the migration succeeded, the original otherwise.
    pub async fn process_one(&self, asset: MediaAsset, cancel: &CancellationToken) -> MediaAsset {
        if !self.auto_migration_enabled() {
            return asset;
        }
        if !self.worker.classifier().is_ephemeral(&asset.source_url) {
            debug!(asset_id = %asset.id, "Asset does not need migration");
            return asset;
        }

        match self.mode {
            MigrationMode::Sync => match self.migrate(&asset, cancel).await {
                Ok(updated) => updated,
                Err(e) => {
                    warn!(asset_id = %asset.id, "Migration failed, keeping original reference: {}", e);
                    asset
                }
            },
            MigrationMode::Background => {
                self.queue.enqueue(asset.clone());
                asset
            }
        }
    }

    /// Batch-migrate with an explicit or configured concurrency.
    pub async fn migrate_batch(
        &self,
        assets: &[MediaAsset],
        concurrency: Option<usize>,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let prepared: Vec<MediaAsset> = assets.iter().map(prepared).collect();
        self.queue
            .batch_migrate(&prepared, concurrency.unwrap_or(self.max_concurrent), cancel)
            .await
    }

    /// Migrate historical assets and return them rewritten where it worked.
    ///
    /// Output order matches input order. Migrated assets keep their
    /// previous reference in `migration.original_url`.
    pub async fn migrate_existing_assets(
        &self,
        assets: Vec<MediaAsset>,
        cancel: &CancellationToken,
    ) -> (Vec<MediaAsset>, BatchResult) {
        let prepared: Vec<MediaAsset> = assets.iter().map(prepared).collect();
        let result = self
            .queue
            .batch_migrate(&prepared, self.max_concurrent, cancel)
            .await;

        let updated = assets
            .into_iter()
            .zip(prepared)
            .zip(&result.records)
            .map(|((original, working), record)| {
                if !record.outcome.transferred() {
                    return original;
                }
                working.with_migration(record).unwrap_or_else(|e| {
                    warn!(asset_id = %original.id, "Could not apply migration outcome: {}", e);
                    original
                })
            })
            .collect();

        (updated, result)
    }

    pub fn stats(&self) -> MigrationStats {
        self.queue.stats()
    }

    pub async fn flush_queue(&self) {
        self.queue.flush().await;
    }

    pub fn clear_queue(&self) -> usize {
        self.queue.clear()
    }

    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::UrlClassifier;
    use crate::fetch::{FetchedSource, SourceFetcher};
    use async_trait::async_trait;
    use bytes::Bytes;
    use relay_models::AssetMetadata;
    use relay_storage::{StorageError, StorageResult};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    struct Fetcher {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceFetcher for Fetcher {
        async fn fetch(&self, _url: &str, _cancel: &CancellationToken) -> MigrationResult<FetchedSource> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MigrationError::fetch_failed("connection reset"));
            }
            Ok(FetchedSource {
                bytes: Bytes::from_static(b"jpeg"),
                content_type: Some("image/jpeg".into()),
            })
        }
    }

    struct Store {
        ensure_fails: bool,
    }

    #[async_trait]
    impl BlobStore for Store {
        async fn put_blob(
            &self,
            container: &str,
            blob_name: &str,
            _data: Bytes,
            _content_type: &str,
            _metadata: &BTreeMap<String, String>,
            _cancel: &CancellationToken,
        ) -> StorageResult<String> {
            Ok(format!("https://store.example/{}/{}", container, blob_name))
        }

        async fn ensure_container(&self, _container: &str, _cancel: &CancellationToken) -> StorageResult<bool> {
            if self.ensure_fails {
                return Err(StorageError::Server(500, "down".into()));
            }
            Ok(true)
        }
    }

    fn integration(mode: MigrationMode, fail: bool) -> (MigrationIntegration, Arc<Fetcher>) {
        let fetcher = Arc::new(Fetcher {
            fail,
            calls: AtomicUsize::new(0),
        });
        let store: Arc<dyn BlobStore> = Arc::new(Store { ensure_fails: fail });
        let worker = MigrationWorker::new(
            UrlClassifier::new(vec!["store.example".into()], vec!["firefly".into()]),
            fetcher.clone(),
            Arc::clone(&store),
            "assets",
        );
        let config = MigrationConfig {
            mode,
            ..Default::default()
        };
        (MigrationIntegration::new(worker, store, &config, None), fetcher)
    }

    fn ephemeral(id: &str) -> MediaAsset {
        MediaAsset::new(
            id,
            format!("https://firefly.example/{}.jpg?sig=abc", id),
            AssetMetadata {
                prompt: "sunset".into(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_sync_mode_rewrites_asset() {
        let (integration, _) = integration(MigrationMode::Sync, false);
        let asset = ephemeral("a");

        let updated = integration.process_one(asset.clone(), &CancellationToken::new()).await;
        assert_eq!(updated.status, AssetStatus::Migrated);
        assert!(updated.source_url.starts_with("https://store.example/assets/sunset-"));
        assert_eq!(updated.migration.unwrap().original_url, asset.source_url);
        assert_eq!(integration.stats().total_migrated, 1);
    }

    #[tokio::test]
    async fn test_sync_failure_returns_original() {
        let (integration, _) = integration(MigrationMode::Sync, true);
        let asset = ephemeral("a");

        let updated = integration.process_one(asset.clone(), &CancellationToken::new()).await;
        assert_eq!(updated, asset);
        assert_eq!(integration.stats().total_failed, 1);

        let err = integration.migrate(&asset, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MigrationError::MigrationFailed(ref msg) if msg.contains("connection reset")));
    }

    #[tokio::test]
    async fn test_background_mode_returns_immediately() {
        let (integration, fetcher) = integration(MigrationMode::Background, false);
        let asset = ephemeral("a");

        let returned = integration.process_one(asset.clone(), &CancellationToken::new()).await;
        assert_eq!(returned, asset);

        integration.flush_queue().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(integration.stats().total_migrated, 1);
    }

    #[tokio::test]
    async fn test_auto_migration_disabled() {
        let (integration, fetcher) = integration(MigrationMode::Sync, false);
        integration.set_auto_migration(false);
        assert!(!integration.auto_migration_enabled());

        let asset = ephemeral("a");
        let returned = integration.process_one(asset.clone(), &CancellationToken::new()).await;
        assert_eq!(returned, asset);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_ephemeral_left_alone() {
        let (integration, fetcher) = integration(MigrationMode::Background, false);
        let durable = MediaAsset::new("d", "https://store.example/assets/x.png", AssetMetadata::default());
        let data = MediaAsset::new("u", "data:image/png;base64,AAAA", AssetMetadata::default());

        assert_eq!(integration.process_one(durable.clone(), &CancellationToken::new()).await, durable);
        assert_eq!(integration.process_one(data.clone(), &CancellationToken::new()).await, data);
        assert_eq!(integration.stats().queue_length, 0);
        assert!(!integration.stats().is_processing);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_migrate_existing_assets() {
        let (integration, _) = integration(MigrationMode::Background, false);
        let mut failed_before = ephemeral("retry");
        failed_before.status = AssetStatus::Failed;
        let durable = MediaAsset::new("d", "https://store.example/assets/x.png", AssetMetadata::default());
        let assets = vec![ephemeral("a"), durable.clone(), failed_before];

        let (updated, result) = integration
            .migrate_existing_assets(assets, &CancellationToken::new())
            .await;

        assert_eq!(result.total, 3);
        assert_eq!(result.success_count, 3);
        assert_eq!(updated[0].status, AssetStatus::Migrated);
        assert_eq!(updated[1], durable);
        assert_eq!(updated[2].status, AssetStatus::Migrated);
        assert_eq!(
            updated[2].migration.as_ref().unwrap().original_url,
            "https://firefly.example/retry.jpg?sig=abc"
        );
    }

    #[tokio::test]
    async fn test_initialize_never_fails() {
        let (ok, _) = integration(MigrationMode::Sync, false);
        assert!(ok.initialize(&CancellationToken::new()).await);

        let (broken, _) = integration(MigrationMode::Sync, true);
        assert!(!broken.initialize(&CancellationToken::new()).await);
    }
}
