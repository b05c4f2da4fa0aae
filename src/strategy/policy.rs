//! Strategies for commands that address the whole policy.

use crate::command::ResponsePayload;
use crate::core::VaultError;
use crate::event::PolicyEvent;
use crate::model::{Lifecycle, Policy};

use super::{guard, stamped, Outcome, StrategyContext};

/// Create the policy, or re-create it after deletion. The caller's
/// revision, lifecycle and timestamp are ignored; the worker's envelope
/// is authoritative.
pub(super) fn create(ctx: &StrategyContext, requested: &Policy) -> Outcome {
    if requested.id != ctx.policy_id {
        return Outcome::Error(VaultError::PolicyInvalid(format!(
            "policy id '{}' does not match the addressed id '{}'",
            requested.id, ctx.policy_id
        )));
    }
    let mut candidate = requested.clone();
    candidate.lifecycle = Lifecycle::Active;
    let candidate = stamped(ctx, candidate);
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    Outcome::Mutation {
        event: PolicyEvent::Created {
            policy: candidate.clone(),
        },
        payload: ResponsePayload::Policy(candidate),
    }
}

/// Replace the entries wholesale
pub(super) fn modify(ctx: &StrategyContext, current: &Policy, requested: &Policy) -> Outcome {
    if requested.id != ctx.policy_id {
        return Outcome::Error(VaultError::PolicyInvalid(format!(
            "policy id '{}' does not match the addressed id '{}'",
            requested.id, ctx.policy_id
        )));
    }
    let candidate = stamped(ctx, current.with_entries(requested.entries.clone()));
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    Outcome::Mutation {
        event: PolicyEvent::Modified { policy: candidate },
        payload: ResponsePayload::None,
    }
}

pub(super) fn retrieve(current: &Policy) -> Outcome {
    Outcome::Query {
        payload: ResponsePayload::Policy(current.clone()),
    }
}

/// Deletion needs no guards; the history and a possible re-creation
/// remain available.
pub(super) fn delete() -> Outcome {
    Outcome::Mutation {
        event: PolicyEvent::Deleted,
        payload: ResponsePayload::None,
    }
}
