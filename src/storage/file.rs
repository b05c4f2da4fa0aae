//! File-backed journal and snapshot store.
//!
//! Every policy id owns one append-only `.events` file holding
//! length-prefixed MessagePack frames (`u32` little-endian length, then
//! the encoded event), and at most one `.snapshot` file that is replaced
//! atomically via a temp file in the same directory. File names are the
//! hex-encoded policy id, which keeps arbitrary id characters out of the
//! filesystem namespace.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task;

use crate::event::PersistedEvent;
use crate::model::PolicyId;

use super::{EventJournal, PolicySnapshot, SnapshotStore, StorageError};

/// Decodes a whole journal file.
///
/// A file that ends mid-prefix or mid-frame was torn by a crash; frames
/// that do not decode, belong to another policy, or break the dense
/// revision sequence mean the store can no longer be trusted. All of
/// these are `Corrupt`, never silently skipped.
fn decode_frames(id: &PolicyId, bytes: &[u8]) -> Result<Vec<PersistedEvent>, StorageError> {
    let mut events = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        if bytes.len() - offset < 4 {
            return Err(StorageError::Corrupt(format!(
                "journal for '{}' ends in a torn length prefix",
                id
            )));
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&bytes[offset..offset + 4]);
        let frame_len = u32::from_le_bytes(prefix) as usize;
        offset += 4;
        if bytes.len() - offset < frame_len {
            return Err(StorageError::Corrupt(format!(
                "journal for '{}' ends in a torn frame",
                id
            )));
        }
        let event: PersistedEvent = rmp_serde::from_slice(&bytes[offset..offset + frame_len])
            .map_err(|err| StorageError::Corrupt(format!("parse journal frame: {}", err)))?;
        offset += frame_len;

        if event.policy_id != *id {
            return Err(StorageError::Corrupt(format!(
                "journal for '{}' holds a frame for '{}'",
                id, event.policy_id
            )));
        }
        let expected = events
            .last()
            .map_or(1, |prev: &PersistedEvent| prev.revision + 1);
        if event.revision != expected {
            return Err(StorageError::Corrupt(format!(
                "journal for '{}' jumps to revision {} where {} was expected",
                id, event.revision, expected
            )));
        }
        events.push(event);
    }
    Ok(events)
}

pub struct FileJournal {
    dir: PathBuf,
    /// Highest revision per stream, filled lazily from disk.
    tails: Mutex<HashMap<PolicyId, u64>>,
}

impl FileJournal {
    /// Opens a journal directory, creating it when absent.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|err| StorageError::Io(err.to_string()))?;
        Ok(Self {
            dir,
            tails: Mutex::new(HashMap::new()),
        })
    }

    fn events_path(&self, id: &PolicyId) -> PathBuf {
        self.dir.join(format!("{}.events", hex::encode(id.as_str())))
    }

    async fn read_stream(&self, id: &PolicyId) -> Result<Vec<PersistedEvent>, StorageError> {
        let path = self.events_path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path)
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        decode_frames(id, &bytes)
    }

    async fn tail_revision(
        &self,
        tails: &mut HashMap<PolicyId, u64>,
        id: &PolicyId,
    ) -> Result<u64, StorageError> {
        if let Some(revision) = tails.get(id) {
            return Ok(*revision);
        }
        let revision = self
            .read_stream(id)
            .await?
            .last()
            .map_or(0, |event| event.revision);
        tails.insert(id.clone(), revision);
        Ok(revision)
    }

    async fn write_frame(&self, path: &Path, frame: &[u8]) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        file.write_all(&(frame.len() as u32).to_le_bytes())
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        file.write_all(frame)
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        file.flush()
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        file.sync_data()
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EventJournal for FileJournal {
    async fn append(
        &self,
        id: &PolicyId,
        expected_revision: u64,
        event: &PersistedEvent,
    ) -> Result<(), StorageError> {
        let mut tails = self.tails.lock().await;
        let last = self.tail_revision(&mut tails, id).await?;
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

        let frame = rmp_serde::to_vec_named(event)
            .map_err(|err| StorageError::Backend(format!("serialize event frame: {}", err)))?;
        if let Err(err) = self.write_frame(&self.events_path(id), &frame).await {
            // The frame may be half on disk; force a rescan before the
            // next append so a torn tail surfaces as Corrupt.
            tails.remove(id);
            return Err(err);
        }
        tails.insert(id.clone(), expected_revision);
        Ok(())
    }

    async fn events_since(
        &self,
        id: &PolicyId,
        from_revision: u64,
    ) -> Result<Vec<PersistedEvent>, StorageError> {
        Ok(self
            .read_stream(id)
            .await?
            .into_iter()
            .filter(|event| event.revision > from_revision)
            .collect())
    }
}

pub struct FileSnapshots {
    dir: PathBuf,
}

impl FileSnapshots {
    /// Opens a snapshot directory, creating it when absent.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|err| StorageError::Io(err.to_string()))?;
        Ok(Self { dir })
    }

    fn snapshot_path(&self, id: &PolicyId) -> PathBuf {
        self.dir
            .join(format!("{}.snapshot", hex::encode(id.as_str())))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshots {
    async fn save(&self, id: &PolicyId, snapshot: &PolicySnapshot) -> Result<(), StorageError> {
        let bytes = rmp_serde::to_vec_named(snapshot)
            .map_err(|err| StorageError::Backend(format!("serialize snapshot: {}", err)))?;
        let dir = self.dir.clone();
        let path = self.snapshot_path(id);
        task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut tmp =
                NamedTempFile::new_in(&dir).map_err(|err| StorageError::Io(err.to_string()))?;
            tmp.write_all(&bytes)
                .map_err(|err| StorageError::Io(err.to_string()))?;
            tmp.flush().map_err(|err| StorageError::Io(err.to_string()))?;
            tmp.as_file()
                .sync_all()
                .map_err(|err| StorageError::Io(err.to_string()))?;
            tmp.persist(&path)
                .map_err(|err| StorageError::Io(err.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|err| StorageError::Backend(format!("snapshot write task: {}", err)))?
    }

    async fn latest(&self, id: &PolicyId) -> Result<Option<PolicySnapshot>, StorageError> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        let snapshot = rmp_serde::from_slice(&bytes)
            .map_err(|err| StorageError::Corrupt(format!("parse snapshot: {}", err)))?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::core::RequestHeaders;
    use crate::event::PolicyEvent;

    fn event(id: &PolicyId, revision: u64) -> PersistedEvent {
        PersistedEvent {
            policy_id: id.clone(),
            revision,
            timestamp: Utc::now(),
            headers: RequestHeaders::empty(),
            event: PolicyEvent::Deleted,
        }
    }

    #[tokio::test]
    async fn torn_tails_read_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let journal = FileJournal::new(dir.path()).unwrap();
        let id = PolicyId::new("ns:file").unwrap();
        journal.append(&id, 1, &event(&id, 1)).await.unwrap();
        journal.append(&id, 2, &event(&id, 2)).await.unwrap();

        let path = journal.events_path(&id);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let err = journal.events_since(&id, 0).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)), "got {:?}", err);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn revision_jumps_on_disk_read_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let journal = FileJournal::new(dir.path()).unwrap();
        let id = PolicyId::new("ns:file").unwrap();
        journal.append(&id, 1, &event(&id, 1)).await.unwrap();

        // Hand-append a frame that skips revision 2.
        let frame = rmp_serde::to_vec_named(&event(&id, 3)).unwrap();
        let mut bytes = std::fs::read(journal.events_path(&id)).unwrap();
        bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&frame);
        std::fs::write(journal.events_path(&id), bytes).unwrap();

        let err = journal.events_since(&id, 0).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn frames_for_another_policy_read_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let journal = FileJournal::new(dir.path()).unwrap();
        let id = PolicyId::new("ns:file").unwrap();
        let other = PolicyId::new("ns:other").unwrap();

        let frame = rmp_serde::to_vec_named(&event(&other, 1)).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&frame);
        std::fs::write(journal.events_path(&id), bytes).unwrap();

        let err = journal.events_since(&id, 0).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt(_)), "got {:?}", err);
    }
}
