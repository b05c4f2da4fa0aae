//! Strategies for the subjects of one entry.

use crate::command::ResponsePayload;
use crate::core::VaultError;
use crate::event::PolicyEvent;
use crate::model::{Label, Policy, PolicyEntry, Subject, SubjectId, Subjects};

use super::{guard, stamped, Outcome, StrategyContext};

fn entry_of<'a>(
    ctx: &StrategyContext,
    current: &'a Policy,
    label: &Label,
) -> Result<&'a PolicyEntry, VaultError> {
    current.entry(label).ok_or_else(|| VaultError::EntryNotFound {
        id: ctx.policy_id.clone(),
        label: label.clone(),
    })
}

pub(super) fn modify_subjects(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
    subjects: &Subjects,
) -> Outcome {
    let entry = match entry_of(ctx, current, label) {
        Ok(entry) => entry,
        Err(err) => return Outcome::Error(err),
    };
    let mut entry = entry.clone();
    entry.subjects = subjects.clone();
    let candidate = stamped(ctx, current.with_entry(label.clone(), entry));
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    Outcome::Mutation {
        event: PolicyEvent::SubjectsModified {
            label: label.clone(),
            subjects: subjects.clone(),
        },
        payload: ResponsePayload::None,
    }
}

pub(super) fn retrieve_subjects(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
) -> Outcome {
    match entry_of(ctx, current, label) {
        Ok(entry) => Outcome::Query {
            payload: ResponsePayload::Subjects(label.clone(), entry.subjects.clone()),
        },
        Err(err) => Outcome::Error(err),
    }
}

pub(super) fn modify_subject(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
    subject_id: &SubjectId,
    subject: &Subject,
) -> Outcome {
    let entry = match entry_of(ctx, current, label) {
        Ok(entry) => entry,
        Err(err) => return Outcome::Error(err),
    };
    let existed = entry.subjects.contains_key(subject_id);
    let candidate = stamped(
        ctx,
        current.with_subject(label, subject_id.clone(), subject.clone()),
    );
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    if existed {
        Outcome::Mutation {
            event: PolicyEvent::SubjectModified {
                label: label.clone(),
                subject_id: subject_id.clone(),
                subject: subject.clone(),
            },
            payload: ResponsePayload::None,
        }
    } else {
        Outcome::Mutation {
            event: PolicyEvent::SubjectCreated {
                label: label.clone(),
                subject_id: subject_id.clone(),
                subject: subject.clone(),
            },
            payload: ResponsePayload::Subject(
                label.clone(),
                subject_id.clone(),
                subject.clone(),
            ),
        }
    }
}

pub(super) fn retrieve_subject(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
    subject_id: &SubjectId,
) -> Outcome {
    let entry = match entry_of(ctx, current, label) {
        Ok(entry) => entry,
        Err(err) => return Outcome::Error(err),
    };
    match entry.subjects.get(subject_id) {
        Some(subject) => Outcome::Query {
            payload: ResponsePayload::Subject(label.clone(), subject_id.clone(), subject.clone()),
        },
        None => Outcome::Error(VaultError::SubjectNotFound {
            id: ctx.policy_id.clone(),
            label: label.clone(),
            subject_id: subject_id.clone(),
        }),
    }
}

pub(super) fn delete_subject(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
    subject_id: &SubjectId,
) -> Outcome {
    let entry = match entry_of(ctx, current, label) {
        Ok(entry) => entry,
        Err(err) => return Outcome::Error(err),
    };
    if !entry.subjects.contains_key(subject_id) {
        return Outcome::Error(VaultError::SubjectNotFound {
            id: ctx.policy_id.clone(),
            label: label.clone(),
            subject_id: subject_id.clone(),
        });
    }
    let candidate = stamped(ctx, current.without_subject(label, subject_id));
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    Outcome::Mutation {
        event: PolicyEvent::SubjectDeleted {
            label: label.clone(),
            subject_id: subject_id.clone(),
        },
        payload: ResponsePayload::None,
    }
}
