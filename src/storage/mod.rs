//! Pluggable persistence for policy journals and snapshots.
//!
//! Two backends ship with the crate: an in-memory one for tests and
//! embedding, and a file-backed one with an append-only event log per
//! policy plus atomically replaced snapshot files.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::PersistedEvent;
use crate::model::{Policy, PolicyId};

pub use file::{FileJournal, FileSnapshots};
pub use memory::{MemoryJournal, MemorySnapshots};

/// Errors surfaced by journal and snapshot backends.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Revision conflict: expected {expected}, journal holds {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Corrupt store: {0}")]
    Corrupt(String),

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether retrying the same operation can reasonably succeed.
    /// Conflicts and corruption are permanent until something else changes.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::Backend(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// A point-in-time copy of a policy and the revision it folds up to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub revision: u64,
    pub taken_at: DateTime<Utc>,
    pub policy: Policy,
}

/// Append-only event log, one stream per policy id.
///
/// Revisions within a stream are dense: the first event carries
/// revision 1 and every append continues exactly one past the highest
/// stored revision. Implementations must reject anything else.
#[async_trait]
pub trait EventJournal: Send + Sync {
    /// Appends one event. `expected_revision` is the revision the caller
    /// believes comes next; on mismatch the append fails with
    /// [`StorageError::Conflict`] and stores nothing.
    async fn append(
        &self,
        id: &PolicyId,
        expected_revision: u64,
        event: &PersistedEvent,
    ) -> Result<(), StorageError>;

    /// Returns every stored event with revision greater than
    /// `from_revision`, in ascending revision order.
    async fn events_since(
        &self,
        id: &PolicyId,
        from_revision: u64,
    ) -> Result<Vec<PersistedEvent>, StorageError>;
}

/// Latest-wins snapshot store; `save` replaces any older snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, id: &PolicyId, snapshot: &PolicySnapshot) -> Result<(), StorageError>;

    async fn latest(&self, id: &PolicyId) -> Result<Option<PolicySnapshot>, StorageError>;
}
