use serde::{Deserialize, Serialize};

use crate::core::RequestHeaders;
use crate::etag::{EntityTag, EtagTarget};
use crate::model::{
    Entries, Label, Policy, PolicyEntry, PolicyId, Resource, ResourceKey, Resources, Subject,
    SubjectId, Subjects,
};

/// The full command surface of the policy worker
///
/// Modifications address the policy, one entry, or one leaf below an
/// entry; retrieves mirror the same shape. The addressed policy id lives
/// on the envelope, not the command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PolicyCommand {
    Create {
        policy: Policy,
    },
    Modify {
        policy: Policy,
    },
    Retrieve,
    Delete,
    ModifyEntries {
        entries: Entries,
    },
    RetrieveEntries,
    ModifyEntry {
        label: Label,
        entry: PolicyEntry,
    },
    RetrieveEntry {
        label: Label,
    },
    DeleteEntry {
        label: Label,
    },
    ModifySubjects {
        label: Label,
        subjects: Subjects,
    },
    RetrieveSubjects {
        label: Label,
    },
    ModifySubject {
        label: Label,
        subject_id: SubjectId,
        subject: Subject,
    },
    RetrieveSubject {
        label: Label,
        subject_id: SubjectId,
    },
    DeleteSubject {
        label: Label,
        subject_id: SubjectId,
    },
    ModifyResources {
        label: Label,
        resources: Resources,
    },
    RetrieveResources {
        label: Label,
    },
    ModifyResource {
        label: Label,
        resource_key: ResourceKey,
        resource: Resource,
    },
    RetrieveResource {
        label: Label,
        resource_key: ResourceKey,
    },
    DeleteResource {
        label: Label,
        resource_key: ResourceKey,
    },
}

impl PolicyCommand {
    /// Stable command name for logs
    pub fn name(&self) -> &'static str {
        match self {
            PolicyCommand::Create { .. } => "create",
            PolicyCommand::Modify { .. } => "modify",
            PolicyCommand::Retrieve => "retrieve",
            PolicyCommand::Delete => "delete",
            PolicyCommand::ModifyEntries { .. } => "modifyEntries",
            PolicyCommand::RetrieveEntries => "retrieveEntries",
            PolicyCommand::ModifyEntry { .. } => "modifyEntry",
            PolicyCommand::RetrieveEntry { .. } => "retrieveEntry",
            PolicyCommand::DeleteEntry { .. } => "deleteEntry",
            PolicyCommand::ModifySubjects { .. } => "modifySubjects",
            PolicyCommand::RetrieveSubjects { .. } => "retrieveSubjects",
            PolicyCommand::ModifySubject { .. } => "modifySubject",
            PolicyCommand::RetrieveSubject { .. } => "retrieveSubject",
            PolicyCommand::DeleteSubject { .. } => "deleteSubject",
            PolicyCommand::ModifyResources { .. } => "modifyResources",
            PolicyCommand::RetrieveResources { .. } => "retrieveResources",
            PolicyCommand::ModifyResource { .. } => "modifyResource",
            PolicyCommand::RetrieveResource { .. } => "retrieveResource",
            PolicyCommand::DeleteResource { .. } => "deleteResource",
        }
    }

    /// The sub-entity this command addresses for conditional requests
    /// and response fingerprints
    pub fn etag_target(&self) -> EtagTarget {
        match self {
            PolicyCommand::Create { .. }
            | PolicyCommand::Modify { .. }
            | PolicyCommand::Retrieve
            | PolicyCommand::Delete => EtagTarget::Policy,
            PolicyCommand::ModifyEntries { .. } | PolicyCommand::RetrieveEntries => {
                EtagTarget::Entries
            }
            PolicyCommand::ModifyEntry { label, .. }
            | PolicyCommand::RetrieveEntry { label }
            | PolicyCommand::DeleteEntry { label } => EtagTarget::Entry(label.clone()),
            PolicyCommand::ModifySubjects { label, .. }
            | PolicyCommand::RetrieveSubjects { label } => EtagTarget::Subjects(label.clone()),
            PolicyCommand::ModifySubject {
                label, subject_id, ..
            }
            | PolicyCommand::RetrieveSubject { label, subject_id }
            | PolicyCommand::DeleteSubject { label, subject_id } => {
                EtagTarget::Subject(label.clone(), subject_id.clone())
            }
            PolicyCommand::ModifyResources { label, .. }
            | PolicyCommand::RetrieveResources { label } => EtagTarget::Resources(label.clone()),
            PolicyCommand::ModifyResource {
                label,
                resource_key,
                ..
            }
            | PolicyCommand::RetrieveResource {
                label,
                resource_key,
            }
            | PolicyCommand::DeleteResource {
                label,
                resource_key,
            } => EtagTarget::Resource(label.clone(), resource_key.clone()),
        }
    }
}

/// A routed command: which policy, what to do, under which conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub policy_id: PolicyId,
    pub command: PolicyCommand,
    pub headers: RequestHeaders,
}

impl CommandEnvelope {
    pub fn new(policy_id: PolicyId, command: PolicyCommand) -> Self {
        Self {
            policy_id,
            command,
            headers: RequestHeaders::new(),
        }
    }

    pub fn with_headers(mut self, headers: RequestHeaders) -> Self {
        self.headers = headers;
        self
    }
}

/// Value returned by a successful command
///
/// Creations return the created value, retrieves the addressed value,
/// plain modifications and deletions return `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
    Policy(Policy),
    Entries(Entries),
    Entry(Label, PolicyEntry),
    Subjects(Label, Subjects),
    Subject(Label, SubjectId, Subject),
    Resources(Label, Resources),
    Resource(Label, ResourceKey, Resource),
    None,
}

/// A successful reply: revision after the command, payload per command
/// kind, fingerprint of the addressed sub-entity, echoed correlation
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSuccess {
    pub policy_id: PolicyId,
    pub revision: u64,
    pub payload: ResponsePayload,
    pub etag: Option<EntityTag>,
    pub headers: RequestHeaders,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_targets_follow_the_addressed_slice() {
        let label = Label::new("admins").unwrap();
        let subject_id = SubjectId::new("issuer:alice").unwrap();

        assert_eq!(PolicyCommand::Retrieve.etag_target(), EtagTarget::Policy);
        assert_eq!(
            PolicyCommand::RetrieveEntries.etag_target(),
            EtagTarget::Entries
        );
        assert_eq!(
            PolicyCommand::DeleteEntry {
                label: label.clone()
            }
            .etag_target(),
            EtagTarget::Entry(label.clone())
        );
        assert_eq!(
            PolicyCommand::RetrieveSubject {
                label: label.clone(),
                subject_id: subject_id.clone()
            }
            .etag_target(),
            EtagTarget::Subject(label, subject_id)
        );
    }
}
