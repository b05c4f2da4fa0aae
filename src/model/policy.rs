use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Result, VaultError};

use super::entry::{Label, PolicyEntry, Resource, ResourceKey, Subject, SubjectId};

const MAX_ID_LENGTH: usize = 256;

/// Identifier of a policy
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(String);

impl PolicyId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(VaultError::InvalidId(
                "policy id must not be empty".to_string(),
            ));
        }
        if id.len() > MAX_ID_LENGTH {
            return Err(VaultError::InvalidId(format!(
                "policy id exceeds {} bytes",
                MAX_ID_LENGTH
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(VaultError::InvalidId(format!(
                "policy id '{}' contains control characters",
                id.escape_default()
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the entity currently exists or has been deleted
///
/// An entity that has never existed is absent: there is no `Policy` value
/// for it at all, so absence needs no lifecycle variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Active,
    Deleted,
}

/// Entries of a policy, keyed by label
pub type Entries = BTreeMap<Label, PolicyEntry>;

/// A versioned, access-controlled policy document
///
/// `revision` counts persisted events over the whole history of the id,
/// including deletions and re-creations; it never resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub lifecycle: Lifecycle,
    pub revision: u64,
    pub modified: DateTime<Utc>,
    pub entries: Entries,
}

impl Policy {
    /// A new active policy at revision zero; the worker assigns the real
    /// revision and timestamp when the create event persists.
    pub fn new(id: PolicyId, entries: Entries) -> Self {
        Self {
            id,
            lifecycle: Lifecycle::Active,
            revision: 0,
            modified: DateTime::<Utc>::MIN_UTC,
            entries,
        }
    }

    pub fn entry(&self, label: &Label) -> Option<&PolicyEntry> {
        self.entries.get(label)
    }

    /// Copy with all entries replaced
    pub fn with_entries(&self, entries: Entries) -> Self {
        let mut next = self.clone();
        next.entries = entries;
        next
    }

    /// Copy with one entry set
    pub fn with_entry(&self, label: Label, entry: PolicyEntry) -> Self {
        let mut next = self.clone();
        next.entries.insert(label, entry);
        next
    }

    /// Copy with one entry removed
    pub fn without_entry(&self, label: &Label) -> Self {
        let mut next = self.clone();
        next.entries.remove(label);
        next
    }

    /// Copy with one subject of one entry set; the entry must exist
    pub fn with_subject(&self, label: &Label, subject_id: SubjectId, subject: Subject) -> Self {
        let mut next = self.clone();
        if let Some(entry) = next.entries.get_mut(label) {
            entry.subjects.insert(subject_id, subject);
        }
        next
    }

    /// Copy with one subject of one entry removed
    pub fn without_subject(&self, label: &Label, subject_id: &SubjectId) -> Self {
        let mut next = self.clone();
        if let Some(entry) = next.entries.get_mut(label) {
            entry.subjects.remove(subject_id);
        }
        next
    }

    /// Copy with one resource of one entry set; the entry must exist
    pub fn with_resource(&self, label: &Label, key: ResourceKey, resource: Resource) -> Self {
        let mut next = self.clone();
        if let Some(entry) = next.entries.get_mut(label) {
            entry.resources.insert(key, resource);
        }
        next
    }

    /// Copy with one resource of one entry removed
    pub fn without_resource(&self, label: &Label, key: &ResourceKey) -> Self {
        let mut next = self.clone();
        if let Some(entry) = next.entries.get_mut(label) {
            entry.resources.remove(key);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_subject(subject: &str) -> PolicyEntry {
        let mut entry = PolicyEntry::default();
        entry
            .subjects
            .insert(SubjectId::new(subject).unwrap(), Subject::new("jwt"));
        entry
    }

    #[test]
    fn policy_id_rejects_empty_oversized_and_control() {
        assert!(PolicyId::new("").is_err());
        assert!(PolicyId::new("a".repeat(257)).is_err());
        assert!(PolicyId::new("ns:\u{7}bell").is_err());
        assert!(PolicyId::new("ns:test").is_ok());
    }

    #[test]
    fn copy_on_write_helpers_leave_the_original_untouched() {
        let label = Label::new("admins").unwrap();
        let policy = Policy::new(
            PolicyId::new("ns:test").unwrap(),
            Entries::from([(label.clone(), entry_with_subject("issuer:alice"))]),
        );

        let grown = policy.with_entry(Label::new("devs").unwrap(), entry_with_subject("issuer:bob"));
        assert_eq!(policy.entries.len(), 1);
        assert_eq!(grown.entries.len(), 2);

        let shrunk = grown.without_entry(&label);
        assert_eq!(grown.entries.len(), 2);
        assert!(!shrunk.entries.contains_key(&label));
    }

    #[test]
    fn subject_helpers_only_touch_the_addressed_entry() {
        let admins = Label::new("admins").unwrap();
        let devs = Label::new("devs").unwrap();
        let policy = Policy::new(
            PolicyId::new("ns:test").unwrap(),
            Entries::from([
                (admins.clone(), entry_with_subject("issuer:alice")),
                (devs.clone(), entry_with_subject("issuer:bob")),
            ]),
        );

        let carol = SubjectId::new("issuer:carol").unwrap();
        let next = policy.with_subject(&devs, carol.clone(), Subject::new("jwt"));
        assert!(next.entry(&devs).unwrap().subjects.contains_key(&carol));
        assert!(!next.entry(&admins).unwrap().subjects.contains_key(&carol));
    }
}
