//! Command strategies: pure decisions from (state, command) to outcome.
//!
//! One strategy per command kind, selected by lifecycle state. Mutation
//! strategies build the candidate next state, run the size and structure
//! guards against it, and emit the event that produces exactly that
//! state when applied.

pub mod context;

mod entries;
mod policy;
mod resources;
mod subjects;

pub use context::StrategyContext;

use crate::command::{CommandEnvelope, PolicyCommand, ResponsePayload};
use crate::core::VaultError;
use crate::event::PolicyEvent;
use crate::model::{validation, Lifecycle, Policy};

/// What a strategy decided
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Persist the event, then answer with the payload
    Mutation {
        event: PolicyEvent,
        payload: ResponsePayload,
    },
    /// Answer from current state without touching the journal
    Query { payload: ResponsePayload },
    /// Reject without touching the journal
    Error(VaultError),
}

/// Select and run the strategy for a command against the current state.
///
/// Exhaustive over lifecycle and command: adding a command variant fails
/// compilation until a strategy exists for it.
pub fn dispatch(
    ctx: &StrategyContext,
    state: Option<&Policy>,
    envelope: &CommandEnvelope,
) -> Outcome {
    match state {
        None => creation_only(ctx, envelope),
        Some(current) if current.lifecycle == Lifecycle::Deleted => creation_only(ctx, envelope),
        Some(current) => active(ctx, current, envelope),
    }
}

/// Absent and deleted entities accept nothing but `Create`; re-creation
/// after deletion continues the revision sequence.
fn creation_only(ctx: &StrategyContext, envelope: &CommandEnvelope) -> Outcome {
    match &envelope.command {
        PolicyCommand::Create { policy } => policy::create(ctx, policy),
        _ => Outcome::Error(VaultError::PolicyNotFound(ctx.policy_id.clone())),
    }
}

fn active(ctx: &StrategyContext, current: &Policy, envelope: &CommandEnvelope) -> Outcome {
    match &envelope.command {
        PolicyCommand::Create { .. } => {
            Outcome::Error(VaultError::PolicyConflict(ctx.policy_id.clone()))
        }
        PolicyCommand::Modify { policy } => policy::modify(ctx, current, policy),
        PolicyCommand::Retrieve => policy::retrieve(current),
        PolicyCommand::Delete => policy::delete(),
        PolicyCommand::ModifyEntries { entries } => {
            entries::modify_entries(ctx, current, entries)
        }
        PolicyCommand::RetrieveEntries => entries::retrieve_entries(current),
        PolicyCommand::ModifyEntry { label, entry } => {
            entries::modify_entry(ctx, current, label, entry)
        }
        PolicyCommand::RetrieveEntry { label } => entries::retrieve_entry(ctx, current, label),
        PolicyCommand::DeleteEntry { label } => entries::delete_entry(ctx, current, label),
        PolicyCommand::ModifySubjects { label, subjects } => {
            subjects::modify_subjects(ctx, current, label, subjects)
        }
        PolicyCommand::RetrieveSubjects { label } => {
            subjects::retrieve_subjects(ctx, current, label)
        }
        PolicyCommand::ModifySubject {
            label,
            subject_id,
            subject,
        } => subjects::modify_subject(ctx, current, label, subject_id, subject),
        PolicyCommand::RetrieveSubject { label, subject_id } => {
            subjects::retrieve_subject(ctx, current, label, subject_id)
        }
        PolicyCommand::DeleteSubject { label, subject_id } => {
            subjects::delete_subject(ctx, current, label, subject_id)
        }
        PolicyCommand::ModifyResources { label, resources } => {
            resources::modify_resources(ctx, current, label, resources)
        }
        PolicyCommand::RetrieveResources { label } => {
            resources::retrieve_resources(ctx, current, label)
        }
        PolicyCommand::ModifyResource {
            label,
            resource_key,
            resource,
        } => resources::modify_resource(ctx, current, label, resource_key, resource),
        PolicyCommand::RetrieveResource {
            label,
            resource_key,
        } => resources::retrieve_resource(ctx, current, label, resource_key),
        PolicyCommand::DeleteResource {
            label,
            resource_key,
        } => resources::delete_resource(ctx, current, label, resource_key),
    }
}

/// Stamp a candidate with the revision and timestamp its event will
/// carry, so the candidate equals the state the event applies to.
pub(crate) fn stamped(ctx: &StrategyContext, mut candidate: Policy) -> Policy {
    candidate.revision = ctx.next_revision;
    candidate.modified = ctx.timestamp;
    candidate
}

/// Size limit first, then structural validation
pub(crate) fn guard(ctx: &StrategyContext, candidate: &Policy) -> Result<(), VaultError> {
    let size = match serde_json::to_vec(candidate) {
        Ok(bytes) => bytes.len(),
        Err(err) => {
            return Err(VaultError::PolicyInvalid(format!(
                "policy cannot be serialized: {}",
                err
            )));
        }
    };
    if size > ctx.max_policy_size {
        return Err(VaultError::PolicyTooLarge {
            actual: size,
            max: ctx.max_policy_size,
        });
    }
    validation::validate(candidate)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};

    use crate::model::{
        Entries, Label, Policy, PolicyEntry, PolicyId, Resource, ResourceKey, Subject, SubjectId,
    };

    use super::StrategyContext;

    pub fn policy_id() -> PolicyId {
        PolicyId::new("ns:test").unwrap()
    }

    pub fn label(name: &str) -> Label {
        Label::new(name).unwrap()
    }

    pub fn subject_id(name: &str) -> SubjectId {
        SubjectId::new(name).unwrap()
    }

    pub fn root_key() -> ResourceKey {
        ResourceKey::new("policy", "/").unwrap()
    }

    pub fn admin_entry() -> PolicyEntry {
        let mut entry = PolicyEntry::default();
        entry
            .subjects
            .insert(subject_id("issuer:alice"), Subject::new("jwt"));
        entry.resources.insert(
            root_key(),
            Resource::new(["READ", "WRITE"], [] as [&str; 0]),
        );
        entry
    }

    /// An active policy with one "admins" entry, as if created at
    /// revision 1
    pub fn active_policy() -> Policy {
        let mut policy = Policy::new(
            policy_id(),
            Entries::from([(label("admins"), admin_entry())]),
        );
        policy.revision = 1;
        policy.modified = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        policy
    }

    pub fn ctx(next_revision: u64) -> StrategyContext {
        StrategyContext {
            policy_id: policy_id(),
            next_revision,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            max_policy_size: 100 * 1024,
        }
    }
}
