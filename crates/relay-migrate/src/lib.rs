//! Ephemeral media migration.
//!
//! This crate provides:
//! - Classification of references as durable, ephemeral or unrecognized
//! - A worker that copies one ephemeral reference into durable storage
//! - A deduplicating background queue and chunked batch migration
//! - Sync/background migration policy for newly created assets
//! - A process-wide context wiring it all to a storage account

pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod integration;
pub mod logging;
pub mod metadata;
pub mod metrics;
pub mod naming;
pub mod queue;
pub mod store;
pub mod worker;

pub use classify::{UrlClass, UrlClassifier};
pub use config::{MigrationConfig, MigrationMode};
pub use context::{MigrationContext, MigrationHealth};
pub use error::{MigrationError, MigrationResult};
pub use fetch::{FetchedSource, HttpSourceFetcher, SourceFetcher};
pub use integration::{AssetUpdateSink, MigrationIntegration};
pub use logging::MigrationLogger;
pub use queue::{CompletionCallback, MigrationQueue, QueueCompletion};
pub use store::BlobStore;
pub use worker::MigrationWorker;
