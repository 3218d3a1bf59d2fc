//! Process-wide migration services, built once at startup.

use std::sync::Arc;

use relay_models::MigrationStats;
use relay_storage::{CircuitBreakerState, ResilientStorageClient, StorageConfig};
use serde::Serialize;
use tracing::info;

use crate::classify::UrlClassifier;
use crate::config::{MigrationConfig, MigrationMode};
use crate::error::MigrationResult;
use crate::fetch::{HttpSourceFetcher, SourceFetcher};
use crate::integration::{AssetUpdateSink, MigrationIntegration};
use crate::store::BlobStore;
use crate::worker::MigrationWorker;

/// Health snapshot for status endpoints and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationHealth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitBreakerState>,
    pub stats: MigrationStats,
    pub mode: MigrationMode,
    pub auto_migration: bool,
    pub container: String,
}

/// Owns the storage client, the worker, the queue and the policy layer.
pub struct MigrationContext {
    config: MigrationConfig,
    storage: Option<ResilientStorageClient>,
    integration: MigrationIntegration,
}

impl MigrationContext {
    /// Wire everything against a real storage account.
    pub fn new(
        mut config: MigrationConfig,
        storage_config: StorageConfig,
        sink: Option<Arc<dyn AssetUpdateSink>>,
    ) -> MigrationResult<Self> {
        if config.durable_hosts.is_empty() {
            if let Some(authority) = storage_config.account_authority() {
                config.durable_hosts.push(authority);
            }
        }

        let storage = ResilientStorageClient::new(storage_config)?;
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(HttpSourceFetcher::new(config.fetch_timeout)?);
        let store: Arc<dyn BlobStore> = Arc::new(storage.clone());

        let mut context = Self::with_components(config, fetcher, store, sink);
        context.storage = Some(storage);
        Ok(context)
    }

    /// Create from environment variables.
    pub fn from_env(sink: Option<Arc<dyn AssetUpdateSink>>) -> MigrationResult<Self> {
        Self::new(MigrationConfig::from_env(), StorageConfig::from_env()?, sink)
    }

    /// Wire custom fetch and store implementations.
    pub fn with_components(
        config: MigrationConfig,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn BlobStore>,
        sink: Option<Arc<dyn AssetUpdateSink>>,
    ) -> Self {
        let classifier = UrlClassifier::new(config.durable_hosts.clone(), config.ephemeral_hosts.clone());
        let worker = MigrationWorker::new(classifier, fetcher, Arc::clone(&store), config.container.clone());
        let integration = MigrationIntegration::new(worker, store, &config, sink);

        info!(
            container = %config.container,
            mode = %config.mode,
            max_concurrent = config.max_concurrent,
            durable_hosts = ?config.durable_hosts,
            "Migration context ready"
        );

        Self {
            config,
            storage: None,
            integration,
        }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn integration(&self) -> &MigrationIntegration {
        &self.integration
    }

    pub fn storage(&self) -> Option<&ResilientStorageClient> {
        self.storage.as_ref()
    }

    /// Check the storage account is reachable. False when none is wired.
    pub async fn test_connection(&self) -> bool {
        match &self.storage {
            Some(storage) => storage.test_connection(&self.config.container).await,
            None => false,
        }
    }

    pub fn health(&self) -> MigrationHealth {
        MigrationHealth {
            circuit: self.storage.as_ref().map(|s| s.circuit_state()),
            stats: self.integration.stats(),
            mode: self.integration.mode(),
            auto_migration: self.integration.auto_migration_enabled(),
            container: self.config.container.clone(),
        }
    }

    pub async fn shutdown(&self) {
        self.integration.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durable_host_defaults_to_account() {
        let storage = StorageConfig::new("https://acct.blob.core.windows.net", "https://mint.example/token");
        let context = MigrationContext::new(MigrationConfig::default(), storage, None).unwrap();

        assert_eq!(context.config().durable_hosts, vec!["acct.blob.core.windows.net"]);
        assert!(context
            .integration()
            .worker()
            .classifier()
            .classify("https://acct.blob.core.windows.net/uxp-images/a.png")
            == crate::classify::UrlClass::Durable);

        let health = context.health();
        assert!(health.circuit.is_some());
        assert_eq!(health.container, "uxp-images");
        assert_eq!(health.stats, MigrationStats::default());
    }

    #[test]
    fn test_explicit_durable_hosts_kept() {
        let config = MigrationConfig {
            durable_hosts: vec!["cdn.example".into()],
            ..Default::default()
        };
        let storage = StorageConfig::new("https://acct.blob.core.windows.net", "https://mint.example/token");
        let context = MigrationContext::new(config, storage, None).unwrap();
        assert_eq!(context.config().durable_hosts, vec!["cdn.example"]);
    }
}
