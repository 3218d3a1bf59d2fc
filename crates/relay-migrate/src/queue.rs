//! Background migration queue.
//!
//! IDLE until something is enqueued, then PROCESSING until the FIFO is
//! empty and nothing is running. At most one migration per asset id and
//! per source URL is queued or running at any time.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use relay_models::{AssetId, AssetStatus, BatchResult, MediaAsset, MigrationRecord, MigrationStats};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::record_queue_depth;
use crate::worker::MigrationWorker;

/// A finished background migration.
#[derive(Debug, Clone)]
pub struct QueueCompletion {
    /// The asset with the outcome applied
    pub asset: MediaAsset,
    pub record: MigrationRecord,
}

/// Called once per finished queue item, before its dedup keys are released.
pub type CompletionCallback = Arc<dyn Fn(QueueCompletion) + Send + Sync>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<MediaAsset>,
    ids: HashSet<AssetId>,
    urls: HashSet<String>,
    processing: bool,
}

impl QueueState {
    fn forget(&mut self, asset: &MediaAsset) {
        self.ids.remove(&asset.id);
        self.urls.remove(&asset.source_url);
    }
}

struct QueueInner {
    worker: MigrationWorker,
    state: Mutex<QueueState>,
    permits: Arc<Semaphore>,
    idle: watch::Sender<bool>,
    wake: Notify,
    shutdown: CancellationToken,
    on_complete: Option<CompletionCallback>,
    total_migrated: AtomicU64,
    total_failed: AtomicU64,
    total_bytes: AtomicU64,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pop(&self) -> Option<MediaAsset> {
        let mut state = self.lock();
        let next = state.pending.pop_front();
        record_queue_depth(state.pending.len());
        next
    }

    fn count(&self, record: &MigrationRecord) {
        if record.outcome.transferred() {
            self.total_migrated.fetch_add(1, Ordering::Relaxed);
            self.total_bytes.fetch_add(record.bytes, Ordering::Relaxed);
        } else if record.outcome.is_failure() {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns true if the loop actually went idle.
    fn try_go_idle(&self) -> bool {
        let mut state = self.lock();
        if !state.pending.is_empty() {
            return false;
        }
        state.processing = false;
        self.idle.send_replace(true);
        true
    }

    fn force_idle(&self) {
        let mut state = self.lock();
        state.processing = false;
        self.idle.send_replace(true);
    }
}

/// FIFO of assets waiting to be migrated in the background.
#[derive(Clone)]
pub struct MigrationQueue {
    inner: Arc<QueueInner>,
}

impl MigrationQueue {
    /// `max_concurrent` bounds migrations in flight (0 is treated as 1).
    pub fn new(worker: MigrationWorker, max_concurrent: usize, on_complete: Option<CompletionCallback>) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(QueueInner {
                worker,
                state: Mutex::new(QueueState::default()),
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                idle,
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                on_complete,
                total_migrated: AtomicU64::new(0),
                total_failed: AtomicU64::new(0),
                total_bytes: AtomicU64::new(0),
            }),
        }
    }

    /// Queue an asset. Returns false if it is a duplicate of a queued or
    /// running item, or if the queue has been shut down.
    pub fn enqueue(&self, asset: MediaAsset) -> bool {
        if self.inner.shutdown.is_cancelled() {
            warn!(asset_id = %asset.id, "Queue is shut down, dropping asset");
            return false;
        }

        let start_loop = {
            let mut state = self.inner.lock();
            if state.ids.contains(&asset.id) || state.urls.contains(&asset.source_url) {
                debug!(asset_id = %asset.id, "Duplicate enqueue dropped");
                return false;
            }
            state.ids.insert(asset.id.clone());
            state.urls.insert(asset.source_url.clone());
            debug!(asset_id = %asset.id, queue_length = state.pending.len() + 1, "Asset queued");
            state.pending.push_back(asset);
            record_queue_depth(state.pending.len());

            let was_idle = !state.processing;
            if was_idle {
                state.processing = true;
                self.inner.idle.send_replace(false);
            }
            was_idle
        };

        if start_loop {
            tokio::spawn(drain(Arc::clone(&self.inner)));
        } else {
            self.inner.wake.notify_one();
        }
        true
    }

    /// Wait until the queue is idle.
    pub async fn flush(&self) {
        let mut rx = self.inner.idle.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }

    /// Drop every item that has not started. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.inner.lock();
        let dropped: Vec<MediaAsset> = state.pending.drain(..).collect();
        for asset in &dropped {
            state.forget(asset);
        }
        record_queue_depth(0);
        if !dropped.is_empty() {
            info!(dropped = dropped.len(), "Cleared migration queue");
        }
        dropped.len()
    }

    /// Cancel running items, drop queued ones and wait for the loop to stop.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.clear();
        self.flush().await;
        info!("Migration queue stopped");
    }

    /// Fold a migration run outside the queue into the lifetime totals.
    pub(crate) fn count(&self, record: &MigrationRecord) {
        self.inner.count(record);
    }

    pub fn stats(&self) -> MigrationStats {
        let state = self.inner.lock();
        MigrationStats {
            queue_length: state.pending.len(),
            is_processing: state.processing,
            total_migrated: self.inner.total_migrated.load(Ordering::Relaxed),
            total_failed: self.inner.total_failed.load(Ordering::Relaxed),
            total_bytes: self.inner.total_bytes.load(Ordering::Relaxed),
        }
    }

    /// Migrate `assets` in chunks of `concurrency`, one chunk at a time.
    ///
    /// Records come back in input order. A failed item never stops the
    /// rest of the batch.
    pub async fn batch_migrate(
        &self,
        assets: &[MediaAsset],
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let started = Instant::now();
        let chunk_size = concurrency.max(1);
        let mut records = Vec::with_capacity(assets.len());

        info!(total = assets.len(), concurrency = chunk_size, "Batch migration started");

        for (index, chunk) in assets.chunks(chunk_size).enumerate() {
            debug!(chunk = index, size = chunk.len(), "Migrating chunk");
            let results = join_all(
                chunk
                    .iter()
                    .map(|asset| self.inner.worker.migrate_asset(asset, cancel)),
            )
            .await;

            for record in &results {
                self.inner.count(record);
            }
            records.extend(results);
        }

        let result = BatchResult::from_records(records, started.elapsed().as_millis() as u64);
        info!(
            total = result.total,
            succeeded = result.success_count,
            failed = result.failure_count,
            skipped = result.skipped_count,
            elapsed_ms = result.elapsed_ms,
            "Batch migration finished"
        );
        result
    }
}

async fn drain(inner: Arc<QueueInner>) {
    let mut running = JoinSet::new();

    loop {
        while let Some(joined) = running.try_join_next() {
            log_join(joined);
        }

        let permit = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            permit = Arc::clone(&inner.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        match inner.pop() {
            Some(asset) => {
                let task_inner = Arc::clone(&inner);
                running.spawn(async move {
                    let _permit = permit;
                    process(&task_inner, asset).await;
                });
            }
            None => {
                drop(permit);
                if running.is_empty() {
                    if inner.try_go_idle() {
                        debug!("Migration queue idle");
                        return;
                    }
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = inner.shutdown.cancelled() => break,
                    Some(joined) = running.join_next() => log_join(joined),
                    _ = inner.wake.notified() => {}
                }
            }
        }
    }

    // Running items see the cancelled token and finish with a cancelled record.
    while let Some(joined) = running.join_next().await {
        log_join(joined);
    }
    inner.force_idle();
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Queued migration task failed: {}", e);
    }
}

async fn process(inner: &QueueInner, asset: MediaAsset) {
    let cancel = inner.shutdown.child_token();

    let mut working = asset.clone();
    if working.status == AssetStatus::Failed {
        working.status.reset();
    }

    let record = inner.worker.migrate_asset(&working, &cancel).await;
    inner.count(&record);

    let updated = match working.with_migration(&record) {
        Ok(updated) => updated,
        Err(e) => {
            warn!(asset_id = %asset.id, "Could not apply migration outcome: {}", e);
            working
        }
    };

    match &inner.on_complete {
        Some(callback) => callback(QueueCompletion {
            asset: updated,
            record,
        }),
        None => info!(
            asset_id = %asset.id,
            outcome = %record.outcome,
            "Background migration finished"
        ),
    }

    inner.lock().forget(&asset);
}
