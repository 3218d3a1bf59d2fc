//! Asset lifecycle status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Migration status of a media asset.
///
/// Transitions only move forward: `Pending -> Migrating -> {Migrated, Failed}`.
/// Going back requires an explicit [`AssetStatus::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    /// Asset still points at its original reference
    #[default]
    Pending,
    /// A migration is running for this asset
    Migrating,
    /// Asset now points at the durable store
    Migrated,
    /// Migration failed; the original reference is kept
    Failed,
}

/// Rejected status transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct StatusTransitionError {
    pub from: AssetStatus,
    pub to: AssetStatus,
}

impl AssetStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Migrating => "migrating",
            AssetStatus::Migrated => "migrated",
            AssetStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssetStatus::Migrated | AssetStatus::Failed)
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: AssetStatus) -> bool {
        matches!(
            (self, next),
            (AssetStatus::Pending, AssetStatus::Migrating)
                | (AssetStatus::Migrating, AssetStatus::Migrated)
                | (AssetStatus::Migrating, AssetStatus::Failed)
        )
    }

    /// Move to `next`, rejecting anything but a forward transition.
    pub fn transition(&mut self, next: AssetStatus) -> Result<(), StatusTransitionError> {
        if !self.can_transition_to(next) {
            return Err(StatusTransitionError { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }

    /// Explicit reset back to `Pending`.
    pub fn reset(&mut self) {
        *self = AssetStatus::Pending;
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
