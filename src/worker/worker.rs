//! The worker task owning one policy's in-memory state.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{Level, event};

use crate::command::{CommandEnvelope, CommandSuccess};
use crate::config::VaultConfig;
use crate::core::{Result, VaultError};
use crate::etag;
use crate::event::{PersistedEvent, PolicyEvent, apply};
use crate::model::{Lifecycle, Policy, PolicyId};
use crate::publish::EventPublisher;
use crate::storage::{EventJournal, PolicySnapshot, SnapshotStore, StorageError};
use crate::strategy::{self, Outcome, StrategyContext};

use super::{WorkerMessage, WorkerSignal};

pub(crate) struct PolicyWorker {
    id: PolicyId,
    epoch: u64,
    config: VaultConfig,
    journal: Arc<dyn EventJournal>,
    snapshots: Arc<dyn SnapshotStore>,
    publisher: Arc<dyn EventPublisher>,
    signals: mpsc::UnboundedSender<WorkerSignal>,
    /// Sender onto the own mailbox, used by spawned snapshot writes to
    /// report their outcome.
    self_tx: mpsc::Sender<WorkerMessage>,

    policy: Option<Policy>,
    revision: u64,
    /// Revision of the latest snapshot attempt; the idempotence guard.
    last_snapshot_revision: u64,
    /// Revision of the latest acknowledged snapshot write.
    confirmed_snapshot_revision: u64,
    access_count: u64,
    /// Access counter captured when the pending activity check was armed.
    accesses_at_check: u64,
    passivation_requested: bool,
    next_activity: Instant,
    next_snapshot: Instant,
}

impl PolicyWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: PolicyId,
        epoch: u64,
        config: VaultConfig,
        journal: Arc<dyn EventJournal>,
        snapshots: Arc<dyn SnapshotStore>,
        publisher: Arc<dyn EventPublisher>,
        signals: mpsc::UnboundedSender<WorkerSignal>,
        self_tx: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        Self {
            id,
            epoch,
            config,
            journal,
            snapshots,
            publisher,
            signals,
            self_tx,
            policy: None,
            revision: 0,
            last_snapshot_revision: 0,
            confirmed_snapshot_revision: 0,
            access_count: 0,
            accesses_at_check: 0,
            passivation_requested: false,
            next_activity: Instant::now(),
            next_snapshot: Instant::now(),
        }
    }

    pub(crate) async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<WorkerMessage>,
        mut drain: oneshot::Receiver<()>,
    ) {
        match timeout(self.config.recovery_timeout, self.recover()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.refuse_all(mailbox, err).await;
                return;
            }
            Err(_) => {
                let err = VaultError::RecoveryFailed {
                    id: self.id.clone(),
                    reason: format!(
                        "recovery did not finish within {:?}",
                        self.config.recovery_timeout
                    ),
                };
                self.refuse_all(mailbox, err).await;
                return;
            }
        }
        event!(
            Level::DEBUG,
            revision = self.revision,
            lifecycle = ?self.policy.as_ref().map(|policy| policy.lifecycle),
            "worker recovered"
        );

        self.arm_activity_check();
        self.next_snapshot = Instant::now() + self.config.snapshot_interval;

        loop {
            tokio::select! {
                message = mailbox.recv() => {
                    match message {
                        Some(message) => {
                            if let Err(err) = self.handle(message).await {
                                event!(Level::ERROR, error = %err, "worker state invalidated");
                                let _ = self.signals.send(WorkerSignal::Failed {
                                    id: self.id.clone(),
                                    epoch: self.epoch,
                                });
                                // Queued replies are dropped; the registry
                                // re-routes them to a fresh worker.
                                return;
                            }
                        }
                        None => return,
                    }
                }
                _ = sleep_until(self.next_activity), if !self.passivation_requested => {
                    self.activity_check().await;
                }
                _ = sleep_until(self.next_snapshot), if self.is_active() => {
                    self.take_snapshot("interval").await;
                }
                _ = &mut drain => {
                    self.drain(&mut mailbox).await;
                    return;
                }
            }
        }
    }

    /// Rebuild state from the latest snapshot plus the journal tail.
    async fn recover(&mut self) -> Result<()> {
        let recovery_error = |reason: String| VaultError::RecoveryFailed {
            id: self.id.clone(),
            reason,
        };

        let base = self
            .snapshots
            .latest(&self.id)
            .await
            .map_err(|err| recovery_error(format!("load snapshot: {}", err)))?
            .map(|snapshot| (snapshot.revision, snapshot.policy));
        let base_revision = base.as_ref().map_or(0, |(revision, _)| *revision);

        let events = self
            .journal
            .events_since(&self.id, base_revision)
            .await
            .map_err(|err| recovery_error(format!("read journal: {}", err)))?;

        let (policy, revision) =
            apply::replay(base, &events).map_err(|err| recovery_error(err.to_string()))?;

        self.policy = policy;
        self.revision = revision;
        self.last_snapshot_revision = base_revision;
        self.confirmed_snapshot_revision = base_revision;
        Ok(())
    }

    /// Terminal path for a worker whose recovery failed: tell the
    /// supervisor, then answer everything in the mailbox with the error.
    async fn refuse_all(self, mut mailbox: mpsc::Receiver<WorkerMessage>, err: VaultError) {
        event!(Level::ERROR, error = %err, "worker recovery failed");
        let _ = self.signals.send(WorkerSignal::Failed {
            id: self.id.clone(),
            epoch: self.epoch,
        });
        mailbox.close();
        while let Some(message) = mailbox.recv().await {
            if let WorkerMessage::Command { reply, .. } = message {
                let _ = reply.send(Err(err.clone()));
            }
        }
    }

    /// Finish the mailbox after the registry unregistered this worker.
    async fn drain(mut self, mailbox: &mut mpsc::Receiver<WorkerMessage>) {
        event!(Level::DEBUG, "worker draining");
        mailbox.close();
        while let Some(message) = mailbox.recv().await {
            if let Err(err) = self.handle(message).await {
                event!(Level::ERROR, error = %err, "worker failed while draining");
                let _ = self.signals.send(WorkerSignal::Failed {
                    id: self.id.clone(),
                    epoch: self.epoch,
                });
                return;
            }
        }
        event!(
            Level::DEBUG,
            accesses = self.access_count,
            revision = self.revision,
            "worker stopped"
        );
        let _ = self.signals.send(WorkerSignal::Stopped {
            id: self.id.clone(),
            epoch: self.epoch,
        });
    }

    /// An `Err` means the worker can no longer trust its in-memory state
    /// and must exit; the error describes why.
    async fn handle(&mut self, message: WorkerMessage) -> Result<()> {
        match message {
            WorkerMessage::Command { envelope, reply } => self.process(envelope, reply).await,
            WorkerMessage::SnapshotAck { revision, outcome } => {
                self.acknowledge_snapshot(revision, outcome);
                Ok(())
            }
        }
    }

    async fn process(
        &mut self,
        envelope: CommandEnvelope,
        reply: oneshot::Sender<Result<CommandSuccess>>,
    ) -> Result<()> {
        event!(
            Level::DEBUG,
            command = envelope.command.name(),
            revision = self.revision,
            "command accepted"
        );

        let target = envelope.command.etag_target();
        let current = etag::current_tag(self.policy.as_ref(), &target);
        if let Err(err) = etag::check_preconditions(&envelope.headers, current.as_ref()) {
            self.respond(reply, Err(err));
            return Ok(());
        }

        let ctx = StrategyContext {
            policy_id: self.id.clone(),
            next_revision: self.revision + 1,
            timestamp: Utc::now(),
            max_policy_size: self.config.max_policy_size,
        };
        match strategy::dispatch(&ctx, self.policy.as_ref(), &envelope) {
            Outcome::Error(err) => {
                self.respond(reply, Err(err));
                Ok(())
            }
            Outcome::Query { payload } => {
                let success = CommandSuccess {
                    policy_id: self.id.clone(),
                    revision: self.revision,
                    payload,
                    etag: current,
                    headers: envelope.headers.echo(),
                };
                self.respond(reply, Ok(success));
                Ok(())
            }
            Outcome::Mutation { event, payload } => {
                let persisted = PersistedEvent {
                    policy_id: self.id.clone(),
                    revision: ctx.next_revision,
                    timestamp: ctx.timestamp,
                    headers: envelope.headers.clone(),
                    event,
                };

                if let Err(err) = self.persist(&persisted).await {
                    self.respond(reply, Err(err.clone()));
                    return Err(err);
                }

                match apply::apply(self.policy.take(), &persisted) {
                    Ok(next) => {
                        self.policy = Some(next);
                        self.revision = persisted.revision;
                    }
                    Err(err) => {
                        // The journal accepted an event the model cannot
                        // fold; memory and journal now disagree.
                        let err = VaultError::RecoveryFailed {
                            id: self.id.clone(),
                            reason: format!("apply persisted event: {}", err),
                        };
                        self.respond(reply, Err(err.clone()));
                        return Err(err);
                    }
                }

                let success = CommandSuccess {
                    policy_id: self.id.clone(),
                    revision: self.revision,
                    payload,
                    etag: etag::current_tag(self.policy.as_ref(), &target),
                    headers: envelope.headers.echo(),
                };
                self.respond(reply, Ok(success));

                self.publisher.publish(&persisted).await;
                self.after_mutation(&persisted).await;
                Ok(())
            }
        }
    }

    /// Append with bounded retries for transient storage failures.
    /// Conflicts and corruption are final on the first occurrence.
    async fn persist(&mut self, persisted: &PersistedEvent) -> Result<()> {
        let max_attempts = self.config.persist_retries.saturating_add(1);
        for attempt in 1..=max_attempts {
            match self
                .journal
                .append(&self.id, persisted.revision, persisted)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    event!(
                        Level::WARN,
                        error = %err,
                        attempt,
                        "journal append failed, retrying"
                    );
                    sleep(self.config.persist_retry_delay).await;
                }
                Err(err) => {
                    event!(Level::ERROR, error = %err, attempt, "journal append failed");
                    return Err(VaultError::Storage(err));
                }
            }
        }
        unreachable!("the final attempt always returns")
    }

    fn respond(
        &mut self,
        reply: oneshot::Sender<Result<CommandSuccess>>,
        result: Result<CommandSuccess>,
    ) {
        self.access_count = self.access_count.saturating_add(1);
        if reply.send(result).is_err() {
            event!(Level::DEBUG, "reply dropped, requester gone");
        }
    }

    /// Timer bookkeeping after a persisted mutation, then the snapshot
    /// threshold check.
    async fn after_mutation(&mut self, persisted: &PersistedEvent) {
        match persisted.event {
            PolicyEvent::Created { .. } => {
                // Entity came (back) into existence.
                self.next_snapshot = Instant::now() + self.config.snapshot_interval;
                self.arm_activity_check();
            }
            PolicyEvent::Deleted => {
                self.arm_activity_check();
            }
            _ => {}
        }

        if self.revision - self.last_snapshot_revision >= self.config.snapshot_threshold {
            self.take_snapshot("threshold").await;
        }
    }

    /// Write a snapshot of the current state on a spawned task.
    ///
    /// Guards: an absent entity is never snapshotted, and no revision is
    /// snapshotted twice. The attempt marker advances immediately; the
    /// confirmed marker only moves when the write acknowledges.
    async fn take_snapshot(&mut self, trigger: &str) {
        self.next_snapshot = Instant::now() + self.config.snapshot_interval;
        let Some(policy) = self.policy.as_ref() else {
            return;
        };
        if self.last_snapshot_revision == self.revision {
            return;
        }

        let snapshot = PolicySnapshot {
            revision: self.revision,
            taken_at: Utc::now(),
            policy: policy.clone(),
        };
        self.last_snapshot_revision = self.revision;
        event!(
            Level::DEBUG,
            revision = snapshot.revision,
            trigger,
            "snapshot scheduled"
        );

        let snapshots = self.snapshots.clone();
        let id = self.id.clone();
        let ack = self.self_tx.clone();
        tokio::spawn(async move {
            let outcome = snapshots.save(&id, &snapshot).await;
            let _ = ack
                .send(WorkerMessage::SnapshotAck {
                    revision: snapshot.revision,
                    outcome,
                })
                .await;
        });
    }

    fn acknowledge_snapshot(
        &mut self,
        revision: u64,
        outcome: std::result::Result<(), StorageError>,
    ) {
        match outcome {
            Ok(()) => {
                self.confirmed_snapshot_revision = self.confirmed_snapshot_revision.max(revision);
                event!(Level::DEBUG, revision, "snapshot written");
            }
            Err(err) => {
                // Non-fatal: the journal still holds the full history.
                event!(Level::WARN, error = %err, revision, "snapshot write failed");
            }
        }
    }

    /// Decide between forced snapshot, reschedule and passivation.
    async fn activity_check(&mut self) {
        let deleted = matches!(
            self.policy.as_ref().map(|policy| policy.lifecycle),
            Some(Lifecycle::Deleted)
        );
        if deleted && self.last_snapshot_revision < self.revision {
            // The final state must be snapshotted before this worker may
            // leave memory.
            self.take_snapshot("deleted").await;
            self.arm_activity_check();
            return;
        }
        if self.access_count != self.accesses_at_check {
            self.arm_activity_check();
            return;
        }

        event!(
            Level::DEBUG,
            accesses = self.access_count,
            "worker idle, requesting passivation"
        );
        self.passivation_requested = true;
        let _ = self.signals.send(WorkerSignal::PassivationRequested {
            id: self.id.clone(),
            epoch: self.epoch,
        });
    }

    fn arm_activity_check(&mut self) {
        let interval = match self.policy.as_ref().map(|policy| policy.lifecycle) {
            Some(Lifecycle::Deleted) => self.config.activity_deleted_interval,
            _ => self.config.activity_interval,
        };
        self.accesses_at_check = self.access_count;
        self.next_activity = Instant::now() + interval;
    }

    fn is_active(&self) -> bool {
        matches!(
            self.policy.as_ref().map(|policy| policy.lifecycle),
            Some(Lifecycle::Active)
        )
    }
}
