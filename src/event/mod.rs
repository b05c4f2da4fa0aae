pub mod apply;

pub use apply::{apply, replay, ApplyError, ReplayError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::RequestHeaders;
use crate::model::{
    Entries, Label, Policy, PolicyEntry, PolicyId, Resource, ResourceKey, Resources, Subject,
    SubjectId, Subjects,
};

/// Everything that can happen to a policy
///
/// The journal is the source of truth: state is only ever changed by
/// applying one of these. `…Created` vs `…Modified` records whether the
/// addressed sub-entity existed before the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PolicyEvent {
    Created {
        policy: Policy,
    },
    Modified {
        policy: Policy,
    },
    Deleted,
    EntriesModified {
        entries: Entries,
    },
    EntryCreated {
        label: Label,
        entry: PolicyEntry,
    },
    EntryModified {
        label: Label,
        entry: PolicyEntry,
    },
    EntryDeleted {
        label: Label,
    },
    SubjectsModified {
        label: Label,
        subjects: Subjects,
    },
    SubjectCreated {
        label: Label,
        subject_id: SubjectId,
        subject: Subject,
    },
    SubjectModified {
        label: Label,
        subject_id: SubjectId,
        subject: Subject,
    },
    SubjectDeleted {
        label: Label,
        subject_id: SubjectId,
    },
    ResourcesModified {
        label: Label,
        resources: Resources,
    },
    ResourceCreated {
        label: Label,
        resource_key: ResourceKey,
        resource: Resource,
    },
    ResourceModified {
        label: Label,
        resource_key: ResourceKey,
        resource: Resource,
    },
    ResourceDeleted {
        label: Label,
        resource_key: ResourceKey,
    },
}

impl PolicyEvent {
    /// Stable event name, identical to the serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            PolicyEvent::Created { .. } => "created",
            PolicyEvent::Modified { .. } => "modified",
            PolicyEvent::Deleted => "deleted",
            PolicyEvent::EntriesModified { .. } => "entriesModified",
            PolicyEvent::EntryCreated { .. } => "entryCreated",
            PolicyEvent::EntryModified { .. } => "entryModified",
            PolicyEvent::EntryDeleted { .. } => "entryDeleted",
            PolicyEvent::SubjectsModified { .. } => "subjectsModified",
            PolicyEvent::SubjectCreated { .. } => "subjectCreated",
            PolicyEvent::SubjectModified { .. } => "subjectModified",
            PolicyEvent::SubjectDeleted { .. } => "subjectDeleted",
            PolicyEvent::ResourcesModified { .. } => "resourcesModified",
            PolicyEvent::ResourceCreated { .. } => "resourceCreated",
            PolicyEvent::ResourceModified { .. } => "resourceModified",
            PolicyEvent::ResourceDeleted { .. } => "resourceDeleted",
        }
    }
}

/// A journaled event: what happened, to which policy, at which revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
    pub policy_id: PolicyId,
    pub revision: u64,
    pub timestamp: DateTime<Utc>,
    pub headers: RequestHeaders,
    pub event: PolicyEvent,
}
