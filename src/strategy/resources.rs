//! Strategies for the resources of one entry.

use crate::command::ResponsePayload;
use crate::core::VaultError;
use crate::event::PolicyEvent;
use crate::model::{Label, Policy, PolicyEntry, Resource, ResourceKey, Resources};

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

pub(super) fn modify_resources(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
    resources: &Resources,
) -> Outcome {
    let entry = match entry_of(ctx, current, label) {
        Ok(entry) => entry,
        Err(err) => return Outcome::Error(err),
    };
    let mut entry = entry.clone();
    entry.resources = resources.clone();
    let candidate = stamped(ctx, current.with_entry(label.clone(), entry));
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    Outcome::Mutation {
        event: PolicyEvent::ResourcesModified {
            label: label.clone(),
            resources: resources.clone(),
        },
        payload: ResponsePayload::None,
    }
}

pub(super) fn retrieve_resources(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
) -> Outcome {
    match entry_of(ctx, current, label) {
        Ok(entry) => Outcome::Query {
            payload: ResponsePayload::Resources(label.clone(), entry.resources.clone()),
        },
        Err(err) => Outcome::Error(err),
    }
}

pub(super) fn modify_resource(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
    resource_key: &ResourceKey,
    resource: &Resource,
) -> Outcome {
    let entry = match entry_of(ctx, current, label) {
        Ok(entry) => entry,
        Err(err) => return Outcome::Error(err),
    };
    let existed = entry.resources.contains_key(resource_key);
    let candidate = stamped(
        ctx,
        current.with_resource(label, resource_key.clone(), resource.clone()),
    );
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    if existed {
        Outcome::Mutation {
            event: PolicyEvent::ResourceModified {
                label: label.clone(),
                resource_key: resource_key.clone(),
                resource: resource.clone(),
            },
            payload: ResponsePayload::None,
        }
    } else {
        Outcome::Mutation {
            event: PolicyEvent::ResourceCreated {
                label: label.clone(),
                resource_key: resource_key.clone(),
                resource: resource.clone(),
            },
            payload: ResponsePayload::Resource(
                label.clone(),
                resource_key.clone(),
                resource.clone(),
            ),
        }
    }
}

pub(super) fn retrieve_resource(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
    resource_key: &ResourceKey,
) -> Outcome {
    let entry = match entry_of(ctx, current, label) {
        Ok(entry) => entry,
        Err(err) => return Outcome::Error(err),
    };
    match entry.resources.get(resource_key) {
        Some(resource) => Outcome::Query {
            payload: ResponsePayload::Resource(
                label.clone(),
                resource_key.clone(),
                resource.clone(),
            ),
        },
        None => Outcome::Error(VaultError::ResourceNotFound {
            id: ctx.policy_id.clone(),
            label: label.clone(),
            resource_key: resource_key.clone(),
        }),
    }
}

pub(super) fn delete_resource(
    ctx: &StrategyContext,
    current: &Policy,
    label: &Label,
    resource_key: &ResourceKey,
) -> Outcome {
    let entry = match entry_of(ctx, current, label) {
        Ok(entry) => entry,
        Err(err) => return Outcome::Error(err),
    };
    if !entry.resources.contains_key(resource_key) {
        return Outcome::Error(VaultError::ResourceNotFound {
            id: ctx.policy_id.clone(),
            label: label.clone(),
            resource_key: resource_key.clone(),
        });
    }
    let candidate = stamped(ctx, current.without_resource(label, resource_key));
    if let Err(err) = guard(ctx, &candidate) {
        return Outcome::Error(err);
    }
    Outcome::Mutation {
        event: PolicyEvent::ResourceDeleted {
            label: label.clone(),
            resource_key: resource_key.clone(),
        },
        payload: ResponsePayload::None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;

    fn lamp_key() -> ResourceKey {
        ResourceKey::new("thing", "/features/lamp").unwrap()
    }

    #[test]
    fn new_resources_report_creation_with_payload() {
        let current = active_policy();
        let outcome = modify_resource(
            &ctx(2),
            &current,
            &label("admins"),
            &lamp_key(),
            &Resource::new(["READ"], [] as [&str; 0]),
        );
        match outcome {
            Outcome::Mutation {
                event: PolicyEvent::ResourceCreated { resource_key, .. },
                payload: ResponsePayload::Resource(_, pk, _),
            } => {
                assert_eq!(resource_key, lamp_key());
                assert_eq!(pk, lamp_key());
            }
            other => panic!("expected resource creation, got {:?}", other),
        }
    }

    #[test]
    fn known_resources_report_modification() {
        let current = active_policy();
        let outcome = modify_resource(
            &ctx(2),
            &current,
            &label("admins"),
            &root_key(),
            &Resource::new(["READ", "WRITE"], [] as [&str; 0]),
        );
        assert!(matches!(
            outcome,
            Outcome::Mutation {
                event: PolicyEvent::ResourceModified { .. },
                payload: ResponsePayload::None,
            }
        ));
    }

    #[test]
    fn revoking_the_last_root_write_grant_is_invalid() {
        let current = active_policy();
        let outcome = modify_resource(
            &ctx(2),
            &current,
            &label("admins"),
            &root_key(),
            &Resource::new(["WRITE"], ["WRITE"]),
        );
        assert!(matches!(
            outcome,
            Outcome::Error(VaultError::PolicyInvalid(_))
        ));
    }

    #[test]
    fn deleting_the_root_grant_resource_is_invalid() {
        let current = active_policy();
        let outcome = delete_resource(&ctx(2), &current, &label("admins"), &root_key());
        assert!(matches!(
            outcome,
            Outcome::Error(VaultError::PolicyInvalid(_))
        ));
    }

    #[test]
    fn deleting_a_secondary_resource_succeeds() {
        let current = active_policy().with_resource(
            &label("admins"),
            lamp_key(),
            Resource::new(["READ"], [] as [&str; 0]),
        );
        let outcome = delete_resource(&ctx(2), &current, &label("admins"), &lamp_key());
        assert!(matches!(
            outcome,
            Outcome::Mutation {
                event: PolicyEvent::ResourceDeleted { .. },
                ..
            }
        ));
    }

    #[test]
    fn missing_resources_are_not_found() {
        let current = active_policy();
        assert!(matches!(
            retrieve_resource(&ctx(2), &current, &label("admins"), &lamp_key()),
            Outcome::Error(VaultError::ResourceNotFound { .. })
        ));
        assert!(matches!(
            delete_resource(&ctx(2), &current, &label("admins"), &lamp_key()),
            Outcome::Error(VaultError::ResourceNotFound { .. })
        ));
        assert!(matches!(
            modify_resources(&ctx(2), &current, &label("ghost"), &Resources::new()),
            Outcome::Error(VaultError::EntryNotFound { .. })
        ));
    }

    #[test]
    fn replacing_resources_keeps_the_guards() {
        let current = active_policy();
        // dropping every resource of the only entry
        let outcome = modify_resources(&ctx(2), &current, &label("admins"), &Resources::new());
        assert!(matches!(
            outcome,
            Outcome::Error(VaultError::PolicyInvalid(_))
        ));
    }
}
