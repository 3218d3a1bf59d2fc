//! Resilient object-storage client.
//!
//! This crate provides:
//! - Scoped, short-lived access tokens from a trusted minting endpoint
//! - Per-scope token caching with refresh margin
//! - Exponential backoff with jitter and Retry-After support
//! - A shared circuit breaker with single-trial half-open state
//! - Blob upload/download/delete/list and container management

pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod token;
pub mod token_cache;


pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitState};
pub use client::{BlobInfo, DownloadResult, ResilientStorageClient, StorageConfig, UploadResult};
pub use error::{StorageError, StorageResult};
pub use retry::RetryPolicy;
pub use token::{HttpTokenBroker, SasToken, TokenBroker, TokenBrokerConfig, TokenPermission, TokenRequest, TokenScope};
pub use token_cache::TokenCache;
