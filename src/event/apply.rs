use thiserror::Error;

use crate::model::{Label, Lifecycle, Policy};

use super::{PersistedEvent, PolicyEvent};

/// A structurally impossible event application.
///
/// During live operation the strategies make these unreachable; during
/// replay they mean the journal disagrees with itself and recovery must
/// fail rather than guess.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    #[error("event '{name}' at revision {revision} requires an existing policy")]
    MissingPolicy { name: &'static str, revision: u64 },

    #[error("event '{name}' at revision {revision} addresses missing entry '{label}'")]
    MissingEntry {
        name: &'static str,
        revision: u64,
        label: Label,
    },
}

/// Why a journal could not be replayed into a state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplayError {
    #[error("revision gap: expected {expected}, journal delivered {actual}")]
    RevisionGap { expected: u64, actual: u64 },

    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Fold one event into the state.
///
/// Total over its domain: either the next state or an error, never a
/// silent skip. Every applied event stamps the envelope's revision and
/// timestamp onto the policy.
pub fn apply(state: Option<Policy>, persisted: &PersistedEvent) -> Result<Policy, ApplyError> {
    let revision = persisted.revision;
    let name = persisted.event.name();

    if let PolicyEvent::Created { policy } = &persisted.event {
        let mut next = policy.clone();
        next.lifecycle = Lifecycle::Active;
        next.revision = revision;
        next.modified = persisted.timestamp;
        return Ok(next);
    }

    let current = state.ok_or(ApplyError::MissingPolicy { name, revision })?;
    let entry_of = |label: &Label| {
        current
            .entry(label)
            .cloned()
            .ok_or_else(|| ApplyError::MissingEntry {
                name,
                revision,
                label: label.clone(),
            })
    };

    let mut next = match &persisted.event {
        PolicyEvent::Created { .. } => unreachable!("handled above"),
        PolicyEvent::Modified { policy } => current.with_entries(policy.entries.clone()),
        PolicyEvent::Deleted => {
            let mut deleted = current;
            deleted.lifecycle = Lifecycle::Deleted;
            deleted
        }
        PolicyEvent::EntriesModified { entries } => current.with_entries(entries.clone()),
        PolicyEvent::EntryCreated { label, entry }
        | PolicyEvent::EntryModified { label, entry } => {
            current.with_entry(label.clone(), entry.clone())
        }
        PolicyEvent::EntryDeleted { label } => {
            entry_of(label)?;
            current.without_entry(label)
        }
        PolicyEvent::SubjectsModified { label, subjects } => {
            let entry = entry_of(label)?;
            let mut entry = entry;
            entry.subjects = subjects.clone();
            current.with_entry(label.clone(), entry)
        }
        PolicyEvent::SubjectCreated {
            label,
            subject_id,
            subject,
        }
        | PolicyEvent::SubjectModified {
            label,
            subject_id,
            subject,
        } => {
            entry_of(label)?;
            current.with_subject(label, subject_id.clone(), subject.clone())
        }
        PolicyEvent::SubjectDeleted { label, subject_id } => {
            entry_of(label)?;
            current.without_subject(label, subject_id)
        }
        PolicyEvent::ResourcesModified { label, resources } => {
            let mut entry = entry_of(label)?;
            entry.resources = resources.clone();
            current.with_entry(label.clone(), entry)
        }
        PolicyEvent::ResourceCreated {
            label,
            resource_key,
            resource,
        }
        | PolicyEvent::ResourceModified {
            label,
            resource_key,
            resource,
        } => {
            entry_of(label)?;
            current.with_resource(label, resource_key.clone(), resource.clone())
        }
        PolicyEvent::ResourceDeleted {
            label,
            resource_key,
        } => {
            entry_of(label)?;
            current.without_resource(label, resource_key)
        }
    };

    next.revision = revision;
    next.modified = persisted.timestamp;
    Ok(next)
}

/// Rebuild state by folding events over an optional snapshot base.
///
/// Checks that revisions form an unbroken `+1` chain starting right
/// after the base; returns the final state (still `None` when there was
/// no history at all) and the last revision seen.
pub fn replay(
    base: Option<(u64, Policy)>,
    events: &[PersistedEvent],
) -> Result<(Option<Policy>, u64), ReplayError> {
    let (mut revision, mut state) = match base {
        Some((revision, policy)) => (revision, Some(policy)),
        None => (0, None),
    };

    for persisted in events {
        let expected = revision + 1;
        if persisted.revision != expected {
            return Err(ReplayError::RevisionGap {
                expected,
                actual: persisted.revision,
            });
        }
        state = Some(apply(state.take(), persisted)?);
        revision = expected;
    }

    Ok((state, revision))
}
