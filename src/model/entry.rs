use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::{Result, VaultError};

/// Name of a policy entry within its policy
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(VaultError::InvalidId("label must not be empty".to_string()));
        }
        if label.chars().any(char::is_control) {
            return Err(VaultError::InvalidId(format!(
                "label '{}' contains control characters",
                label.escape_default()
            )));
        }
        Ok(Self(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an authorization subject, e.g. an issuer-qualified user
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(VaultError::InvalidId(
                "subject id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subject granted by a policy entry
///
/// The `kind` records how the subject authenticates (for example `"jwt"`);
/// it is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: String,
}

impl Subject {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

/// Addresses a protected resource as `type:path`, e.g. `thing:/features`
///
/// Serialized as its string form so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub resource_type: String,
    pub path: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        let resource_type = resource_type.into();
        let path = path.into();
        if resource_type.is_empty() {
            return Err(VaultError::InvalidId(
                "resource type must not be empty".to_string(),
            ));
        }
        if !path.starts_with('/') {
            return Err(VaultError::InvalidId(format!(
                "resource path '{}' must start with '/'",
                path
            )));
        }
        Ok(Self {
            resource_type,
            path,
        })
    }

    /// Parse the `type:path` form
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(':') {
            Some((resource_type, path)) => Self::new(resource_type, path),
            None => Err(VaultError::InvalidId(format!(
                "resource key '{}' is missing the ':' separator",
                raw
            ))),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.path)
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}

/// Permissions effected on one resource: explicit grants and revocations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub grant: BTreeSet<String>,
    pub revoke: BTreeSet<String>,
}

impl Resource {
    pub fn new(
        grant: impl IntoIterator<Item = impl Into<String>>,
        revoke: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            grant: grant.into_iter().map(Into::into).collect(),
            revoke: revoke.into_iter().map(Into::into).collect(),
        }
    }

    /// True when the permission is granted and not simultaneously revoked
    pub fn effectively_grants(&self, permission: &str) -> bool {
        self.grant.contains(permission) && !self.revoke.contains(permission)
    }
}

/// Subjects of one entry, keyed by subject id
pub type Subjects = BTreeMap<SubjectId, Subject>;

/// Resources of one entry, keyed by resource key
pub type Resources = BTreeMap<ResourceKey, Resource>;

/// One policy entry: who (subjects) may do what (resources)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub subjects: Subjects,
    pub resources: Resources,
}

impl PolicyEntry {
    pub fn new(subjects: Subjects, resources: Resources) -> Self {
        Self {
            subjects,
            resources,
        }
    }

    /// Copy of this entry with one subject set
    pub fn with_subject(&self, subject_id: SubjectId, subject: Subject) -> Self {
        let mut next = self.clone();
        next.subjects.insert(subject_id, subject);
        next
    }

    /// Copy of this entry with one subject removed
    pub fn without_subject(&self, subject_id: &SubjectId) -> Self {
        let mut next = self.clone();
        next.subjects.remove(subject_id);
        next
    }

    /// Copy of this entry with one resource set
    pub fn with_resource(&self, key: ResourceKey, resource: Resource) -> Self {
        let mut next = self.clone();
        next.resources.insert(key, resource);
        next
    }

    /// Copy of this entry with one resource removed
    pub fn without_resource(&self, key: &ResourceKey) -> Self {
        let mut next = self.clone();
        next.resources.remove(key);
        next
    }
}
