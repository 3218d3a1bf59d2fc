//! Shared data models for the asset relay.
//!
//! This crate provides Serde-serializable types for:
//! - Media assets produced by generation providers
//! - Asset lifecycle status
//! - Migration records and batch results
//! - Migration and container statistics

pub mod asset;
pub mod record;
pub mod stats;
pub mod status;

// Re-export common types
pub use asset::{AssetId, AssetMetadata, MediaAsset, MigrationInfo};
pub use record::{BatchResult, MigrationOutcome, MigrationRecord};
pub use stats::{ContainerStats, MigrationStats};
pub use status::{AssetStatus, StatusTransitionError};
