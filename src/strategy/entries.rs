//! Strategies for the entries map and single entries.

use crate::command::ResponsePayload;
use crate::core::VaultError;
use crate::event::PolicyEvent;
use crate::model::{Entries, Label, Policy, PolicyEntry};

use super::{guard, stamped, Outcome, StrategyContext};

pub(super) fn modify_entries(
    ctx: &StrategyContext,
    current: &Policy,
    entries: &Entries,
) -> Outcome {
    let candidate = stamped(ctx, current.with_entries(entries.clone()));
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    Outcome::Mutation {
        event: PolicyEvent::EntriesModified {
            entries: entries.clone(),
        },
        payload: ResponsePayload::None,
    }
}

pub(super) fn retrieve_entries(current: &Policy) -> Outcome {
    Outcome::Query {
        payload: ResponsePayload::Entries(current.entries.clone()),
    }
}

pub(super) fn modify_entry(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
    entry: &PolicyEntry,
) -> Outcome {
    let existed = current.entry(label).is_some();
    let candidate = stamped(ctx, current.with_entry(label.clone(), entry.clone()));
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    if existed {
        Outcome::Mutation {
            event: PolicyEvent::EntryModified {
                label: label.clone(),
                entry: entry.clone(),
            },
            payload: ResponsePayload::None,
        }
    } else {
        Outcome::Mutation {
            event: PolicyEvent::EntryCreated {
                label: label.clone(),
                entry: entry.clone(),
            },
            payload: ResponsePayload::Entry(label.clone(), entry.clone()),
        }
    }
}

pub(super) fn retrieve_entry(ctx: &StrategyContext, current: &Policy, label: &Label) -> Outcome {
    match current.entry(label) {
        Some(entry) => Outcome::Query {
            payload: ResponsePayload::Entry(label.clone(), entry.clone()),
        },
        None => Outcome::Error(VaultError::EntryNotFound {
            id: ctx.policy_id.clone(),
            label: label.clone(),
        }),
    }
}

pub(super) fn delete_entry(ctx: &StrategyContext, current: &Policy, label: &Label) -> Outcome {
    if current.entry(label).is_none() {
        return Outcome::Error(VaultError::EntryNotFound {
            id: ctx.policy_id.clone(),
            label: label.clone(),
        });
    }
    let candidate = stamped(ctx, current.without_entry(label));
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    Outcome::Mutation {
        event: PolicyEvent::EntryDeleted {
            label: label.clone(),
        },
        payload: ResponsePayload::None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;

    #[test]
    fn modifying_a_new_entry_reports_creation() {
        let current = active_policy();
        let outcome = modify_entry(&ctx(2), &current, &label("devs"), &admin_entry());
        match outcome {
            Outcome::Mutation {
                event: PolicyEvent::EntryCreated { label: l, .. },
                payload: ResponsePayload::Entry(pl, _),
            } => {
                assert_eq!(l, label("devs"));
                assert_eq!(pl, label("devs"));
            }
            other => panic!("expected entry creation, got {:?}", other),
        }
    }

    #[test]
    fn modifying_an_existing_entry_reports_modification() {
        let current = active_policy();
        let outcome = modify_entry(&ctx(2), &current, &label("admins"), &admin_entry());
        assert!(matches!(
            outcome,
            Outcome::Mutation {
                event: PolicyEvent::EntryModified { .. },
                payload: ResponsePayload::None,
            }
        ));
    }

    #[test]
    fn deleting_the_last_administrative_entry_is_invalid() {
        let current = active_policy();
        let outcome = delete_entry(&ctx(2), &current, &label("admins"));
        assert!(matches!(
            outcome,
            Outcome::Error(VaultError::PolicyInvalid(_))
        ));
    }

    #[test]
    fn deleting_a_secondary_entry_succeeds() {
        let current = active_policy().with_entry(label("devs"), admin_entry());
        let outcome = delete_entry(&ctx(2), &current, &label("devs"));
        assert!(matches!(
            outcome,
            Outcome::Mutation {
                event: PolicyEvent::EntryDeleted { .. },
                payload: ResponsePayload::None,
            }
        ));
    }

    #[test]
    fn missing_entries_are_not_found() {
        let current = active_policy();
        assert!(matches!(
            retrieve_entry(&ctx(2), &current, &label("ghost")),
            Outcome::Error(VaultError::EntryNotFound { .. })
        ));
        assert!(matches!(
            delete_entry(&ctx(2), &current, &label("ghost")),
            Outcome::Error(VaultError::EntryNotFound { .. })
        ));
    }

    #[test]
    fn replacing_all_entries_keeps_the_guards() {
        let current = active_policy();
        let outcome = modify_entries(&ctx(2), &current, &Entries::new());
        assert!(matches!(
            outcome,
            Outcome::Error(VaultError::PolicyInvalid(_))
        ));

        let next = Entries::from([(label("ops"), admin_entry())]);
        assert!(matches!(
            modify_entries(&ctx(2), &current, &next),
            Outcome::Mutation {
                event: PolicyEvent::EntriesModified { .. },
                ..
            }
        ));
    }
}
