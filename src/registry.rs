//! Routing commands to per-policy workers.
//!
//! The registry owns the worker map and guarantees that each policy id
//! has at most one live worker. Passivation is a handshake: the worker
//! asks, the registry unregisters it and only then fires the drain
//! signal, so a command can never land behind the drain. Senders that
//! hit a draining worker wait for the drain to finish and then spawn a
//! fresh one.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Level, event};

use crate::command::{CommandEnvelope, CommandSuccess};
use crate::config::VaultConfig;
use crate::core::{Result, VaultError};
use crate::model::PolicyId;
use crate::publish::{EventPublisher, NoopPublisher};
use crate::storage::{EventJournal, MemoryJournal, MemorySnapshots, SnapshotStore};
use crate::worker::{self, WorkerHandle, WorkerMessage, WorkerSignal};

/// Routing attempts per command before giving up. Each retry only
/// happens when the previous worker provably never processed the
/// command, so re-routing cannot duplicate a mutation.
const MAX_ROUTE_ATTEMPTS: usize = 3;

enum WorkerEntry {
    Live(WorkerHandle),
    /// The worker was unregistered and is finishing its mailbox. `done`
    /// flips to true when it has stopped; senders subscribe and wait.
    Draining {
        epoch: u64,
        done: watch::Sender<bool>,
        join: JoinHandle<()>,
    },
}

/// The front door of the vault: resolves each command to the worker
/// owning the addressed policy, spawning and recovering workers on
/// demand.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self` except
/// [`shutdown`](PolicyRegistry::shutdown). Must be created inside a
/// Tokio runtime.
pub struct PolicyRegistry {
    config: VaultConfig,
    journal: Arc<dyn EventJournal>,
    snapshots: Arc<dyn SnapshotStore>,
    publisher: Arc<dyn EventPublisher>,
    workers: Arc<Mutex<HashMap<PolicyId, WorkerEntry>>>,
    signals: mpsc::UnboundedSender<WorkerSignal>,
    next_epoch: AtomicU64,
    supervisor: JoinHandle<()>,
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PolicyRegistry {
    pub fn new(
        config: VaultConfig,
        journal: Arc<dyn EventJournal>,
        snapshots: Arc<dyn SnapshotStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        config.validate().map_err(VaultError::Config)?;
        let workers = Arc::new(Mutex::new(HashMap::new()));
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let supervisor = tokio::spawn(supervise(workers.clone(), signal_rx));
        Ok(Self {
            config,
            journal,
            snapshots,
            publisher,
            workers,
            signals,
            next_epoch: AtomicU64::new(1),
            supervisor,
        })
    }

    /// Registry over in-memory storage without notifications; state
    /// lives for as long as the process does.
    pub fn in_memory(config: VaultConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(MemoryJournal::new()),
            Arc::new(MemorySnapshots::new()),
            Arc::new(NoopPublisher),
        )
    }

    /// Route one command to the worker owning the addressed policy and
    /// wait for its reply.
    ///
    /// Commands to the same policy are answered in submission order.
    /// When the resolved worker turns out to be gone before it took the
    /// command, routing retries against a fresh worker.
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<CommandSuccess> {
        let id = envelope.policy_id.clone();
        for _ in 0..MAX_ROUTE_ATTEMPTS {
            let tx = self.live_sender(&id).await;
            let (reply_tx, reply_rx) = oneshot::channel();
            let message = WorkerMessage::Command {
                envelope: envelope.clone(),
                reply: reply_tx,
            };
            if tx.send(message).await.is_err() {
                // Worker exited between lookup and send.
                continue;
            }
            match reply_rx.await {
                Ok(result) => return result,
                // The reply sender was dropped unanswered, which only
                // happens when the worker never dequeued the command.
                Err(_) => continue,
            }
        }
        event!(Level::WARN, policy_id = %id, "routing attempts exhausted");
        Err(VaultError::WorkerClosed(id))
    }

    /// Mailbox sender of the live worker for `id`, spawning one if none
    /// exists and waiting out a drain in progress.
    async fn live_sender(&self, id: &PolicyId) -> mpsc::Sender<WorkerMessage> {
        loop {
            let mut waiter = {
                let mut workers = self.workers.lock().await;
                match workers.entry(id.clone()) {
                    Entry::Occupied(slot) => {
                        // A live entry with a closed mailbox is a worker
                        // that died without the drain handshake. Evict it
                        // here instead of waiting for its failure signal.
                        let dead = matches!(
                            slot.get(),
                            WorkerEntry::Live(handle) if handle.tx.is_closed()
                        );
                        if dead {
                            event!(Level::DEBUG, policy_id = %id, "evicting dead worker");
                            slot.remove();
                            continue;
                        }
                        match slot.get() {
                            WorkerEntry::Live(handle) => return handle.tx.clone(),
                            WorkerEntry::Draining { done, .. } => done.subscribe(),
                        }
                    }
                    Entry::Vacant(slot) => {
                        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
                        event!(Level::DEBUG, policy_id = %id, epoch, "spawning worker");
                        let handle = worker::spawn(
                            id.clone(),
                            epoch,
                            self.config.clone(),
                            self.journal.clone(),
                            self.snapshots.clone(),
                            self.publisher.clone(),
                            self.signals.clone(),
                        );
                        let tx = handle.tx.clone();
                        slot.insert(WorkerEntry::Live(handle));
                        return tx;
                    }
                }
            };
            // Both a completed drain and a dropped sender mean the entry
            // is settled; re-check the map either way.
            let _ = waiter.changed().await;
        }
    }

    /// Force the worker for `id` out of memory and wait until it has
    /// drained. A no-op for ids without a worker. The next command
    /// recovers the policy from storage.
    pub async fn passivate(&self, id: &PolicyId) {
        let mut waiter = {
            let mut workers = self.workers.lock().await;
            match workers.remove(id) {
                None => return,
                Some(WorkerEntry::Live(handle)) => {
                    let WorkerHandle {
                        drain, epoch, join, ..
                    } = handle;
                    event!(Level::DEBUG, policy_id = %id, epoch, "passivating worker");
                    let _ = drain.send(());
                    let (done, _) = watch::channel(false);
                    let rx = done.subscribe();
                    workers.insert(id.clone(), WorkerEntry::Draining { epoch, done, join });
                    rx
                }
                Some(WorkerEntry::Draining { epoch, done, join }) => {
                    let rx = done.subscribe();
                    workers.insert(id.clone(), WorkerEntry::Draining { epoch, done, join });
                    rx
                }
            }
        };
        let _ = waiter.changed().await;
    }

    /// Drain every worker and wait for all of them to stop.
    pub async fn shutdown(self) {
        let drained: Vec<(PolicyId, WorkerEntry)> = {
            let mut workers = self.workers.lock().await;
            workers.drain().collect()
        };
        event!(Level::DEBUG, workers = drained.len(), "registry shutting down");

        let mut joins = Vec::with_capacity(drained.len());
        for (_, entry) in drained {
            match entry {
                WorkerEntry::Live(handle) => {
                    let _ = handle.drain.send(());
                    joins.push(handle.join);
                }
                WorkerEntry::Draining { join, .. } => joins.push(join),
            }
        }
        futures::future::join_all(joins).await;

        // Workers held the other signal senders; dropping ours lets the
        // supervisor run out of input and exit.
        drop(self.signals);
        let _ = self.supervisor.await;
    }
}

/// React to worker lifecycle signals.
///
/// Every transition checks the signal's epoch against the map before
/// acting, so a signal from a replaced worker can never evict its
/// successor. The task exits once all signal senders are gone.
async fn supervise(
    workers: Arc<Mutex<HashMap<PolicyId, WorkerEntry>>>,
    mut signals: mpsc::UnboundedReceiver<WorkerSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let mut workers = workers.lock().await;
        match signal {
            WorkerSignal::PassivationRequested { id, epoch } => {
                match workers.remove(&id) {
                    Some(WorkerEntry::Live(handle)) if handle.epoch == epoch => {
                        event!(Level::DEBUG, policy_id = %id, epoch, "passivating worker");
                        let WorkerHandle { drain, join, .. } = handle;
                        let _ = drain.send(());
                        let (done, _) = watch::channel(false);
                        workers.insert(id, WorkerEntry::Draining { epoch, done, join });
                    }
                    Some(entry) => {
                        event!(Level::DEBUG, policy_id = %id, epoch, "stale passivation request");
                        workers.insert(id, entry);
                    }
                    None => {}
                }
            }
            WorkerSignal::Stopped { id, epoch } => match workers.remove(&id) {
                Some(WorkerEntry::Draining {
                    epoch: draining,
                    done,
                    ..
                }) if draining == epoch => {
                    event!(Level::DEBUG, policy_id = %id, epoch, "worker passivated");
                    let _ = done.send(true);
                }
                Some(entry) => {
                    workers.insert(id, entry);
                }
                None => {}
            },
            WorkerSignal::Failed { id, epoch } => match workers.remove(&id) {
                Some(WorkerEntry::Live(handle)) if handle.epoch == epoch => {
                    event!(Level::WARN, policy_id = %id, epoch, "worker failed, state dropped");
                    // Dropping the handle closes the mailbox; senders
                    // re-route queued commands to a fresh worker.
                }
                Some(WorkerEntry::Draining {
                    epoch: draining,
                    done,
                    ..
                }) if draining == epoch => {
                    event!(Level::WARN, policy_id = %id, epoch, "worker failed while draining");
                    let _ = done.send(true);
                }
                Some(entry) => {
                    workers.insert(id, entry);
                }
                None => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::command::{PolicyCommand, ResponsePayload};
    use crate::core::ErrorKind;
    use crate::model::{Label, Policy, PolicyEntry, Resource, ResourceKey, Subject, SubjectId};

    fn admin_policy(id: &PolicyId) -> Policy {
        let mut entry = PolicyEntry::default();
        entry
            .subjects
            .insert(SubjectId::new("issuer:alice").unwrap(), Subject::new("jwt"));
        entry.resources.insert(
            ResourceKey::new("policy", "/").unwrap(),
            Resource::new(["READ", "WRITE"], [] as [&str; 0]),
        );
        let mut entries = BTreeMap::new();
        entries.insert(Label::new("admins").unwrap(), entry);
        Policy::new(id.clone(), entries)
    }

    #[tokio::test]
    async fn invalid_configs_are_rejected_up_front() {
        let err = PolicyRegistry::in_memory(VaultConfig::new().mailbox_capacity(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn a_created_policy_is_retrievable() {
        let registry = PolicyRegistry::in_memory(VaultConfig::new()).unwrap();
        let id = PolicyId::new("ns:registry").unwrap();

        let created = registry
            .send(CommandEnvelope::new(
                id.clone(),
                PolicyCommand::Create {
                    policy: admin_policy(&id),
                },
            ))
            .await
            .unwrap();
        assert_eq!(created.revision, 1);

        let retrieved = registry
            .send(CommandEnvelope::new(id.clone(), PolicyCommand::Retrieve))
            .await
            .unwrap();
        assert_eq!(retrieved.revision, 1);
        match retrieved.payload {
            ResponsePayload::Policy(policy) => assert_eq!(policy.id, id),
            other => panic!("unexpected payload {:?}", other),
        }

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn passivating_an_unknown_policy_is_a_no_op() {
        let registry = PolicyRegistry::in_memory(VaultConfig::new()).unwrap();
        registry
            .passivate(&PolicyId::new("ns:nobody").unwrap())
            .await;
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn passivation_survives_through_the_journal() {
        let registry = PolicyRegistry::in_memory(VaultConfig::new()).unwrap();
        let id = PolicyId::new("ns:sleeper").unwrap();

        registry
            .send(CommandEnvelope::new(
                id.clone(),
                PolicyCommand::Create {
                    policy: admin_policy(&id),
                },
            ))
            .await
            .unwrap();
        registry.passivate(&id).await;
        assert!(registry.workers.lock().await.is_empty());

        // The next command respawns a worker that replays the journal.
        let retrieved = registry
            .send(CommandEnvelope::new(id.clone(), PolicyCommand::Retrieve))
            .await
            .unwrap();
        assert_eq!(retrieved.revision, 1);

        registry.shutdown().await;
    }
}
