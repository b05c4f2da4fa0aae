use chrono::{DateTime, Utc};

use crate::model::PolicyId;

/// Everything a strategy may depend on besides the current state
///
/// Strategies are pure functions; the worker resolves the clock and the
/// next revision before dispatch so identical inputs always produce
/// identical outcomes.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    /// The addressed policy
    pub policy_id: PolicyId,

    /// Revision the event will persist at
    pub next_revision: u64,

    /// Timestamp the event will carry
    pub timestamp: DateTime<Utc>,

    /// Serialized-size limit for candidate states
    pub max_policy_size: usize,
}
