use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{RequestHeaders, Result, VaultError};
use crate::model::{Label, Lifecycle, Policy, ResourceKey, SubjectId};

/// Number of digest bytes kept in a rendered tag
const TAG_BYTES: usize = 16;

/// Opaque fingerprint of one sub-entity
///
/// Computed as the SHA-256 of the canonical JSON serialization; the model
/// uses ordered maps throughout, so equal values always produce equal
/// tags. Rendered in the quoted HTTP style, e.g. `"01ab…"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityTag(String);

impl EntityTag {
    /// Fingerprint of any serializable value.
    ///
    /// Returns `None` only when the value cannot be serialized, which is
    /// not the case for the model types of this crate.
    pub fn from_entity<T: Serialize>(entity: &T) -> Option<Self> {
        let bytes = serde_json::to_vec(entity).ok()?;
        let digest = Sha256::digest(&bytes);
        Some(Self(hex::encode(&digest[..TAG_BYTES])))
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// Matcher carried by `if-match` / `if-none-match` headers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TagMatcher {
    /// `*`: matches any existing entity
    Any,
    /// Matches when the current tag is one of the listed tags
    Tags(Vec<EntityTag>),
}

impl TagMatcher {
    /// Matcher for exactly one tag
    pub fn tag(tag: EntityTag) -> Self {
        Self::Tags(vec![tag])
    }

    pub fn matches(&self, tag: &EntityTag) -> bool {
        match self {
            TagMatcher::Any => true,
            TagMatcher::Tags(tags) => tags.contains(tag),
        }
    }
}

impl fmt::Display for TagMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagMatcher::Any => f.write_str("*"),
            TagMatcher::Tags(tags) => {
                for (i, tag) in tags.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", tag)?;
                }
                Ok(())
            }
        }
    }
}

/// The sub-entity a command addresses for conditional-request purposes
#[derive(Debug, Clone, PartialEq)]
pub enum EtagTarget {
    Policy,
    Entries,
    Entry(Label),
    Subjects(Label),
    Subject(Label, SubjectId),
    Resources(Label),
    Resource(Label, ResourceKey),
}

/// Fingerprint of the addressed sub-entity in the current state.
///
/// Absent and deleted entities present no tag at all; a conditional
/// request sees them exactly as it would see an entity that never
/// existed.
pub fn current_tag(policy: Option<&Policy>, target: &EtagTarget) -> Option<EntityTag> {
    let policy = policy?;
    if policy.lifecycle == Lifecycle::Deleted {
        return None;
    }
    match target {
        EtagTarget::Policy => EntityTag::from_entity(policy),
        EtagTarget::Entries => EntityTag::from_entity(&policy.entries),
        EtagTarget::Entry(label) => policy.entry(label).and_then(EntityTag::from_entity),
        EtagTarget::Subjects(label) => policy
            .entry(label)
            .and_then(|entry| EntityTag::from_entity(&entry.subjects)),
        EtagTarget::Subject(label, subject_id) => policy
            .entry(label)
            .and_then(|entry| entry.subjects.get(subject_id))
            .and_then(EntityTag::from_entity),
        EtagTarget::Resources(label) => policy
            .entry(label)
            .and_then(|entry| EntityTag::from_entity(&entry.resources)),
        EtagTarget::Resource(label, key) => policy
            .entry(label)
            .and_then(|entry| entry.resources.get(key))
            .and_then(EntityTag::from_entity),
    }
}

/// Evaluate `if-match` / `if-none-match` against the current tag of the
/// addressed sub-entity. Runs before any strategy; a failure means no
/// event is persisted and no state changes.
pub fn check_preconditions(
    headers: &RequestHeaders,
    current: Option<&EntityTag>,
) -> Result<()> {
    if let Some(matcher) = &headers.if_match {
        match current {
            Some(tag) if matcher.matches(tag) => {}
            Some(tag) => {
                return Err(VaultError::PreconditionFailed(format!(
                    "if-match {} does not match entity tag {}",
                    matcher, tag
                )));
            }
            None => {
                return Err(VaultError::PreconditionFailed(format!(
                    "if-match {} but the addressed entity does not exist",
                    matcher
                )));
            }
        }
    }
    if let Some(matcher) = &headers.if_none_match {
        if let Some(tag) = current {
            if matcher.matches(tag) {
                return Err(VaultError::PreconditionFailed(format!(
                    "if-none-match {} matches entity tag {}",
                    matcher, tag
                )));
            }
        }
    }
    Ok(())
}
