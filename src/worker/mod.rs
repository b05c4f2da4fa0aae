//! Per-policy worker tasks.
//!
//! Each policy id is owned by at most one worker at a time. A worker
//! replays its state from storage when spawned, then serves its bounded
//! mailbox strictly in order. It reports lifecycle transitions to the
//! registry through [`WorkerSignal`]s and stops through a drain signal
//! the registry fires only after unregistering it, so no message can
//! land behind the drain.

mod worker;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span};

use crate::command::{CommandEnvelope, CommandSuccess};
use crate::config::VaultConfig;
use crate::core::Result;
use crate::model::PolicyId;
use crate::publish::EventPublisher;
use crate::storage::{EventJournal, SnapshotStore, StorageError};

use worker::PolicyWorker;

/// Messages a worker consumes from its mailbox.
pub(crate) enum WorkerMessage {
    Command {
        envelope: CommandEnvelope,
        reply: oneshot::Sender<Result<CommandSuccess>>,
    },
    /// Outcome of a spawned snapshot write, reported back to the owning
    /// worker so it can track the confirmed snapshot revision.
    SnapshotAck {
        revision: u64,
        outcome: std::result::Result<(), StorageError>,
    },
}

/// Notifications a worker sends to its supervisor.
///
/// `epoch` names the spawn generation; the registry ignores signals
/// whose epoch does not match its bookkeeping, so a replaced worker can
/// never evict its successor.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkerSignal {
    /// The worker has been idle for a full activity interval and wants
    /// to leave memory.
    PassivationRequested { id: PolicyId, epoch: u64 },
    /// The mailbox is drained and the task is exiting cleanly.
    Stopped { id: PolicyId, epoch: u64 },
    /// Recovery or persistence failed; in-memory state is gone and the
    /// next command must replay from the journal.
    Failed { id: PolicyId, epoch: u64 },
}

/// Registry-side handle to one live worker.
pub(crate) struct WorkerHandle {
    pub(crate) tx: mpsc::Sender<WorkerMessage>,
    pub(crate) drain: oneshot::Sender<()>,
    pub(crate) epoch: u64,
    pub(crate) join: JoinHandle<()>,
}

pub(crate) fn spawn(
    id: PolicyId,
    epoch: u64,
    config: VaultConfig,
    journal: Arc<dyn EventJournal>,
    snapshots: Arc<dyn SnapshotStore>,
    publisher: Arc<dyn EventPublisher>,
    signals: mpsc::UnboundedSender<WorkerSignal>,
) -> WorkerHandle {
    let (tx, mailbox) = mpsc::channel(config.mailbox_capacity);
    let (drain_tx, drain_rx) = oneshot::channel();
    let span = info_span!("policy.worker", policy_id = %id, epoch);
    let worker = PolicyWorker::new(
        id,
        epoch,
        config,
        journal,
        snapshots,
        publisher,
        signals,
        tx.clone(),
    );
    let join = tokio::spawn(worker.run(mailbox, drain_rx).instrument(span));
    WorkerHandle {
        tx,
        drain: drain_tx,
        epoch,
        join,
    }
}
