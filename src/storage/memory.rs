//! In-memory journal and snapshot store.
//!
//! The default backend for tests and for embedding the vault without
//! durability. Streams live for as long as the process does.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::event::PersistedEvent;
use crate::model::PolicyId;

use super::{EventJournal, PolicySnapshot, SnapshotStore, StorageError};

#[derive(Default)]
pub struct MemoryJournal {
    streams: RwLock<HashMap<PolicyId, Vec<PersistedEvent>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored for one policy.
    pub async fn stream_len(&self, id: &PolicyId) -> usize {
        self.streams.read().await.get(id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventJournal for MemoryJournal {
    async fn append(
        &self,
        id: &PolicyId,
        expected_revision: u64,
        event: &PersistedEvent,
    ) -> Result<(), StorageError> {
        let mut streams = self.streams.write().await;
        let stream = streams.entry(id.clone()).or_default();
        let last = stream.last().map_or(0, |stored| stored.revision);
        if expected_revision != last + 1 {
            return Err(StorageError::Conflict {
                expected: expected_revision,
                actual: last,
            });
        }
        if event.revision != expected_revision {
            return Err(StorageError::Corrupt(format!(
                "event carries revision {} but was appended at {}",
                event.revision, expected_revision
            )));
        }
        stream.push(event.clone());
        Ok(())
    }

    async fn events_since(
        &self,
        id: &PolicyId,
        from_revision: u64,
    ) -> Result<Vec<PersistedEvent>, StorageError> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|stored| stored.revision > from_revision)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemorySnapshots {
    snapshots: RwLock<HashMap<PolicyId, PolicySnapshot>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshots {
    async fn save(&self, id: &PolicyId, snapshot: &PolicySnapshot) -> Result<(), StorageError> {
        self.snapshots
            .write()
            .await
            .insert(id.clone(), snapshot.clone());
        Ok(())
    }

    async fn latest(&self, id: &PolicyId) -> Result<Option<PolicySnapshot>, StorageError> {
        Ok(self.snapshots.read().await.get(id).cloned())
    }
}
