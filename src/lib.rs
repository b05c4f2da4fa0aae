//! Event-sourced worker backend for versioned, access-controlled policy
//! entities.
//!
//! Every policy is a stream of events in a journal; current state is the
//! fold of those events, optionally fast-forwarded from a snapshot. Each
//! policy id is owned by at most one asynchronous worker at a time, so
//! commands against one policy are serialized without locks. Idle
//! workers passivate and later recover from storage on demand.
//!
//! [`PolicyRegistry`] is the front door: it routes [`CommandEnvelope`]s
//! to workers, spawning and recovering them as needed.
//!
//! # Examples
//!
//! ```
//! use std::collections::BTreeMap;
//!
//! use twinvault::model::{Label, Policy, PolicyEntry, PolicyId, Resource, ResourceKey,
//!     Subject, SubjectId};
//! use twinvault::{CommandEnvelope, PolicyCommand, PolicyRegistry, VaultConfig};
//!
//! # fn main() -> twinvault::Result<()> {
//! tokio_test::block_on(async {
//!     let registry = PolicyRegistry::in_memory(VaultConfig::new())?;
//!     let id = PolicyId::new("door:front")?;
//!
//!     // One entry: alice administers the policy.
//!     let mut entry = PolicyEntry::default();
//!     entry
//!         .subjects
//!         .insert(SubjectId::new("issuer:alice")?, Subject::new("jwt"));
//!     entry.resources.insert(
//!         ResourceKey::new("policy", "/")?,
//!         Resource::new(["READ", "WRITE"], [] as [&str; 0]),
//!     );
//!     let mut entries = BTreeMap::new();
//!     entries.insert(Label::new("owner")?, entry);
//!
//!     let created = registry
//!         .send(CommandEnvelope::new(
//!             id.clone(),
//!             PolicyCommand::Create {
//!                 policy: Policy::new(id.clone(), entries),
//!             },
//!         ))
//!         .await?;
//!     assert_eq!(created.revision, 1);
//!
//!     registry.shutdown().await;
//!     Ok(())
//! })
//! # }
//! ```

pub mod command;
pub mod config;
pub mod core;
pub mod etag;
pub mod event;
pub mod model;
pub mod publish;
pub mod registry;
pub mod storage;

mod strategy;
mod worker;

// Re-export the types most callers need.
pub use crate::command::{CommandEnvelope, CommandSuccess, PolicyCommand, ResponsePayload};
pub use crate::config::VaultConfig;
pub use crate::core::{ErrorKind, RequestHeaders, Result, VaultError};
pub use crate::etag::{EntityTag, EtagTarget, TagMatcher};
pub use crate::event::{PersistedEvent, PolicyEvent};
pub use crate::model::{Policy, PolicyId};
pub use crate::publish::{BroadcastPublisher, EventPublisher, NoopPublisher};
pub use crate::registry::PolicyRegistry;
pub use crate::storage::{
    EventJournal, FileJournal, FileSnapshots, MemoryJournal, MemorySnapshots, PolicySnapshot,
    SnapshotStore, StorageError,
};
