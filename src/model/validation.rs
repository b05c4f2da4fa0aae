use crate::core::{Result, VaultError};

use super::entry::ResourceKey;
use super::policy::Policy;

/// Resource type that guards the policy document itself
pub const POLICY_RESOURCE_TYPE: &str = "policy";

/// Root path of the policy resource
pub const ROOT_PATH: &str = "/";

/// Permission required to administer a policy
pub const WRITE_PERMISSION: &str = "WRITE";

/// Check the structural invariants of a candidate policy.
///
/// A policy must carry at least one entry, every entry must name at least
/// one subject and one resource, and at least one entry must keep an
/// unrevoked `WRITE` grant on `policy:/` so the document can still be
/// administered after the change.
pub fn validate(policy: &Policy) -> Result<()> {
    if policy.entries.is_empty() {
        return Err(VaultError::PolicyInvalid(
            "policy must contain at least one entry".to_string(),
        ));
    }

    for (label, entry) in &policy.entries {
        if entry.subjects.is_empty() {
            return Err(VaultError::PolicyInvalid(format!(
                "entry '{}' must contain at least one subject",
                label
            )));
        }
        if entry.resources.is_empty() {
            return Err(VaultError::PolicyInvalid(format!(
                "entry '{}' must contain at least one resource",
                label
            )));
        }
    }

    let root = ResourceKey {
        resource_type: POLICY_RESOURCE_TYPE.to_string(),
        path: ROOT_PATH.to_string(),
    };
    let administrable = policy.entries.values().any(|entry| {
        entry
            .resources
            .get(&root)
            .is_some_and(|resource| resource.effectively_grants(WRITE_PERMISSION))
    });
    if !administrable {
        return Err(VaultError::PolicyInvalid(format!(
            "no entry grants '{}' on '{}:{}'",
            WRITE_PERMISSION, POLICY_RESOURCE_TYPE, ROOT_PATH
        )));
    }

    Ok(())
}
