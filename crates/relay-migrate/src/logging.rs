//! Structured migration logging.

use relay_models::AssetId;
use tracing::{error, info, warn, Span};

/// Lifecycle logger for one asset and one operation.
#[derive(Debug, Clone)]
pub struct MigrationLogger {
    asset_id: String,
    operation: String,
}

impl MigrationLogger {
    /// `operation` is e.g. "migrate", "queue_drain", "batch".
    pub fn new(asset_id: &AssetId, operation: &str) -> Self {
        Self::from_string(asset_id.as_str(), operation)
    }

    pub fn from_string(asset_id: &str, operation: &str) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            asset_id = %self.asset_id,
            operation = %self.operation,
            "Migration started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            asset_id = %self.asset_id,
            operation = %self.operation,
            "Migration progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            asset_id = %self.asset_id,
            operation = %self.operation,
            "Migration warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            asset_id = %self.asset_id,
            operation = %self.operation,
            "Migration error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            asset_id = %self.asset_id,
            operation = %self.operation,
            "Migration completed: {}", message
        );
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the asset id and operation.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "migration",
            asset_id = %self.asset_id,
            operation = %self.operation
        )
    }
}
