//! Destination side of a migration.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use relay_storage::{ResilientStorageClient, StorageResult};
use tokio_util::sync::CancellationToken;

/// Where migrated bytes go.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob and return its durable URL.
    async fn put_blob(
        &self,
        container: &str,
        blob_name: &str,
        data: Bytes,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> StorageResult<String>;

    /// Create the container if needed.
    async fn ensure_container(&self, container: &str, cancel: &CancellationToken) -> StorageResult<bool>;
}

#[async_trait]
impl BlobStore for ResilientStorageClient {
    async fn put_blob(
        &self,
        container: &str,
        blob_name: &str,
        data: Bytes,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> StorageResult<String> {
        let uploaded = self
            .upload_blob(container, blob_name, data, content_type, metadata, cancel)
            .await?;
        Ok(uploaded.url)
    }

    async fn ensure_container(&self, container: &str, cancel: &CancellationToken) -> StorageResult<bool> {
        ResilientStorageClient::ensure_container(self, container, cancel).await
    }
}
