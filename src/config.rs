use std::time::Duration;

/// Tuning knobs for workers, snapshotting and passivation
///
/// The defaults suit a long-running backend; tests shrink the intervals
/// to milliseconds.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// How long an active (or absent) entity may stay idle before its
    /// worker asks to be passivated
    pub activity_interval: Duration,

    /// Idle check period for deleted entities, which are kept on a much
    /// shorter leash
    pub activity_deleted_interval: Duration,

    /// Periodic snapshot interval while the entity is active
    pub snapshot_interval: Duration,

    /// Number of persisted events between snapshots
    pub snapshot_threshold: u64,

    /// Upper bound on the serialized size of a policy, in bytes
    pub max_policy_size: usize,

    /// Capacity of each worker mailbox; senders wait when it is full
    pub mailbox_capacity: usize,

    /// Additional journal append attempts after a transient failure
    pub persist_retries: u32,

    /// Pause between append attempts
    pub persist_retry_delay: Duration,

    /// Deadline for replaying an entity from snapshot and journal
    pub recovery_timeout: Duration,
}

impl VaultConfig {
    /// Create a configuration with production defaults
    pub fn new() -> Self {
        Self {
            activity_interval: Duration::from_secs(2 * 60 * 60),
            activity_deleted_interval: Duration::from_secs(5 * 60),
            snapshot_interval: Duration::from_secs(15 * 60),
            snapshot_threshold: 100,
            max_policy_size: 100 * 1024,
            mailbox_capacity: 64,
            persist_retries: 2,
            persist_retry_delay: Duration::from_millis(50),
            recovery_timeout: Duration::from_secs(5),
        }
    }

    /// Set the idle interval for active entities
    pub fn activity_interval(mut self, interval: Duration) -> Self {
        self.activity_interval = interval;
        self
    }

    /// Set the idle interval for deleted entities
    pub fn activity_deleted_interval(mut self, interval: Duration) -> Self {
        self.activity_deleted_interval = interval;
        self
    }

    /// Set the periodic snapshot interval
    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Set the number of events between snapshots
    pub fn snapshot_threshold(mut self, threshold: u64) -> Self {
        self.snapshot_threshold = threshold;
        self
    }

    /// Set the maximum serialized policy size in bytes
    pub fn max_policy_size(mut self, bytes: usize) -> Self {
        self.max_policy_size = bytes;
        self
    }

    /// Set the worker mailbox capacity
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Set how often a failed append is retried
    pub fn persist_retries(mut self, retries: u32) -> Self {
        self.persist_retries = retries;
        self
    }

    /// Set the pause between append attempts
    pub fn persist_retry_delay(mut self, delay: Duration) -> Self {
        self.persist_retry_delay = delay;
        self
    }

    /// Set the recovery deadline
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.activity_interval.is_zero() {
            return Err("activity_interval must be greater than zero".to_string());
        }
        if self.activity_deleted_interval.is_zero() {
            return Err("activity_deleted_interval must be greater than zero".to_string());
        }
        if self.snapshot_interval.is_zero() {
            return Err("snapshot_interval must be greater than zero".to_string());
        }
        if self.snapshot_threshold == 0 {
            return Err("snapshot_threshold must be at least 1".to_string());
        }
        if self.max_policy_size == 0 {
            return Err("max_policy_size must be greater than zero".to_string());
        }
        if self.mailbox_capacity == 0 {
            return Err("mailbox_capacity must be at least 1".to_string());
        }
        if self.recovery_timeout.is_zero() {
            return Err("recovery_timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(VaultConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_overrides_fields() {
        let config = VaultConfig::new()
            .snapshot_threshold(5)
            .mailbox_capacity(8)
            .activity_interval(Duration::from_millis(100));

        assert_eq!(config.snapshot_threshold, 5);
        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.activity_interval, Duration::from_millis(100));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let config = VaultConfig::new().snapshot_threshold(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_mailbox_is_rejected() {
        let config = VaultConfig::new().mailbox_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        assert!(
            VaultConfig::new()
                .activity_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            VaultConfig::new()
                .snapshot_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            VaultConfig::new()
                .recovery_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
