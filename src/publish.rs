//! Change notification fan-out.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{Level, event};

use crate::event::PersistedEvent;

/// Receives every event a worker persisted and applied.
///
/// Publishing is fire-and-forget: the worker does not wait for delivery
/// and a failing or absent consumer never fails a command.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &PersistedEvent);
}

/// Fan-out over a `tokio::sync::broadcast` channel.
///
/// Subscribers that fall behind by more than the channel capacity lose
/// the oldest notifications. That is acceptable for a change feed; the
/// journal stays the source of truth.
pub struct BroadcastPublisher {
    sender: broadcast::Sender<PersistedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PersistedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &PersistedEvent) {
        if self.sender.send(event.clone()).is_err() {
            event!(
                Level::DEBUG,
                policy_id = %event.policy_id,
                revision = event.revision,
                "event notification dropped, no subscribers"
            );
        }
    }
}

/// Publisher that discards every notification.
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _event: &PersistedEvent) {}
}
