use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::etag::TagMatcher;

/// Request metadata carried on every command, echoed on every response
/// and stored on persisted events for traceability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestHeaders {
    /// Correlates responses and published events with their request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Only proceed when the addressed sub-entity matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_match: Option<TagMatcher>,

    /// Only proceed when the addressed sub-entity does not match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_none_match: Option<TagMatcher>,
}

impl RequestHeaders {
    /// Headers with a fresh correlation id and no preconditions
    pub fn new() -> Self {
        Self {
            correlation_id: Some(Uuid::new_v4()),
            ..Self::default()
        }
    }

    /// Headers carrying nothing
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn if_match(mut self, matcher: TagMatcher) -> Self {
        self.if_match = Some(matcher);
        self
    }

    pub fn if_none_match(mut self, matcher: TagMatcher) -> Self {
        self.if_none_match = Some(matcher);
        self
    }

    /// The subset echoed back on responses
    pub(crate) fn echo(&self) -> Self {
        Self {
            correlation_id: self.correlation_id,
            if_match: None,
            if_none_match: None,
        }
    }
}
