//! Migration error types.

use relay_models::StatusTransitionError;
use relay_storage::StorageError;
use thiserror::Error;

pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Source returned HTTP {0}")]
    FetchStatus(u16),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Migration cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid status transition: {0}")]
    Status(#[from] StatusTransitionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    pub fn fetch_failed(msg: impl Into<String>) -> Self {
        Self::FetchFailed(msg.into())
    }

    pub fn migration_failed(msg: impl Into<String>) -> Self {
        Self::MigrationFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the error came from a cancellation signal, at any layer.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            MigrationError::Cancelled | MigrationError::Storage(StorageError::Cancelled)
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::Storage(e) => e.is_retryable(),
            MigrationError::Network(e) => e.is_connect() || e.is_timeout(),
            MigrationError::FetchStatus(status) => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            MigrationError::Storage(e) => e.retry_after_ms(),
            _ => None,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            MigrationError::Storage(e) => e.http_status(),
            MigrationError::Network(e) => e.status().map(|s| s.as_u16()),
            MigrationError::FetchStatus(status) => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_detection_through_storage() {
        assert!(MigrationError::Cancelled.is_cancelled());
        assert!(MigrationError::from(StorageError::Cancelled).is_cancelled());
        assert!(!MigrationError::fetch_failed("nope").is_cancelled());
    }

    #[test]
    fn test_status_passthrough() {
        let err = MigrationError::from(StorageError::Server(503, String::new()));
        assert_eq!(err.http_status(), Some(503));
        assert!(err.is_retryable());
        assert_eq!(MigrationError::FetchStatus(404).http_status(), Some(404));
        assert!(!MigrationError::FetchStatus(404).is_retryable());
    }
}
