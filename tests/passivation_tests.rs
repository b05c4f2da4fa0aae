use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use twinvault::model::{
    Entries, Label, Lifecycle, Policy, PolicyEntry, PolicyId, Resource, ResourceKey, Subject,
    SubjectId,
};
use twinvault::{
    CommandEnvelope, EventJournal, MemoryJournal, MemorySnapshots, NoopPublisher, PersistedEvent,
    PolicyCommand, PolicyRegistry, ResponsePayload, SnapshotStore, StorageError, VaultConfig,
    VaultError,
};

fn admin_entry() -> PolicyEntry {
    let mut entry = PolicyEntry::default();
    entry
        .subjects
        .insert(SubjectId::new("issuer:alice").unwrap(), Subject::new("jwt"));
    entry.resources.insert(
        ResourceKey::new("policy", "/").unwrap(),
        Resource::new(["READ", "WRITE"], [] as [&str; 0]),
    );
    entry
}

fn admin_policy(id: &PolicyId) -> Policy {
    Policy::new(
        id.clone(),
        Entries::from([(Label::new("admins").unwrap(), admin_entry())]),
    )
}

async fn create(registry: &PolicyRegistry, id: &PolicyId) -> u64 {
    registry
        .send(CommandEnvelope::new(
            id.clone(),
            PolicyCommand::Create {
                policy: admin_policy(id),
            },
        ))
        .await
        .unwrap()
        .revision
}

/// Journal that counts recoveries; every spawned worker reads exactly
/// once.
struct CountingJournal {
    inner: MemoryJournal,
    reads: AtomicU32,
}

impl CountingJournal {
    fn new() -> Self {
        Self {
            inner: MemoryJournal::new(),
            reads: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl EventJournal for CountingJournal {
    async fn append(
        &self,
        id: &PolicyId,
        expected_revision: u64,
        event: &PersistedEvent,
    ) -> Result<(), StorageError> {
        self.inner.append(id, expected_revision, event).await
    }

    async fn events_since(
        &self,
        id: &PolicyId,
        from_revision: u64,
    ) -> Result<Vec<PersistedEvent>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.events_since(id, from_revision).await
    }
}

#[tokio::test]
async fn idle_workers_passivate_and_are_respawned_on_demand() {
    let journal = Arc::new(CountingJournal::new());
    let registry = PolicyRegistry::new(
        VaultConfig::new().activity_interval(Duration::from_millis(50)),
        journal.clone(),
        Arc::new(MemorySnapshots::new()),
        Arc::new(NoopPublisher),
    )
    .unwrap();
    let id = PolicyId::new("ns:idle").unwrap();

    assert_eq!(create(&registry, &id).await, 1);
    assert_eq!(journal.reads.load(Ordering::SeqCst), 1);

    // Two idle checks pass without traffic; the worker drains itself.
    sleep(Duration::from_millis(600)).await;

    let retrieved = registry
        .send(CommandEnvelope::new(id.clone(), PolicyCommand::Retrieve))
        .await
        .unwrap();
    assert_eq!(retrieved.revision, 1);
    // The retrieve was served by a fresh worker replaying the journal.
    assert_eq!(journal.reads.load(Ordering::SeqCst), 2);

    registry.shutdown().await;
}

#[tokio::test]
async fn deleted_policies_are_snapshotted_and_keep_their_sequence() {
    let snapshots = Arc::new(MemorySnapshots::new());
    let registry = PolicyRegistry::new(
        VaultConfig::new().activity_deleted_interval(Duration::from_millis(50)),
        Arc::new(MemoryJournal::new()),
        snapshots.clone(),
        Arc::new(NoopPublisher),
    )
    .unwrap();
    let id = PolicyId::new("ns:shortlease").unwrap();

    assert_eq!(create(&registry, &id).await, 1);
    registry
        .send(CommandEnvelope::new(id.clone(), PolicyCommand::Delete))
        .await
        .unwrap();

    // The first idle check after the delete writes a final snapshot.
    let mut snapshot = None;
    for _ in 0..200 {
        if let Some(found) = snapshots.latest(&id).await.unwrap() {
            snapshot = Some(found);
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let snapshot = snapshot.expect("no snapshot of the deleted policy");
    assert_eq!(snapshot.revision, 2);
    assert_eq!(snapshot.policy.lifecycle, Lifecycle::Deleted);

    // Give the following check time to passivate the worker, then make
    // sure re-creation still extends the old sequence.
    sleep(Duration::from_millis(200)).await;
    let err = registry
        .send(CommandEnvelope::new(id.clone(), PolicyCommand::Retrieve))
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::PolicyNotFound(_)));
    assert_eq!(create(&registry, &id).await, 3);

    registry.shutdown().await;
}

#[tokio::test]
async fn passivation_answers_inflight_commands_first() {
    let registry = Arc::new(PolicyRegistry::in_memory(VaultConfig::new()).unwrap());
    let id = PolicyId::new("ns:inflight").unwrap();
    assert_eq!(create(&registry, &id).await, 1);

    let mut tasks = Vec::new();
    for i in 0..4 {
        let registry = registry.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            registry
                .send(CommandEnvelope::new(
                    id,
                    PolicyCommand::ModifySubject {
                        label: Label::new("admins").unwrap(),
                        subject_id: SubjectId::new(format!("issuer:user-{}", i)).unwrap(),
                        subject: Subject::new("jwt"),
                    },
                ))
                .await
        }));
    }
    registry.passivate(&id).await;

    // Every command is answered, whether it was queued before the drain
    // or re-routed to the successor.
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let retrieved = registry
        .send(CommandEnvelope::new(id.clone(), PolicyCommand::Retrieve))
        .await
        .unwrap();
    assert_eq!(retrieved.revision, 5);
    match retrieved.payload {
        ResponsePayload::Policy(policy) => {
            let entry = &policy.entries[&Label::new("admins").unwrap()];
            assert_eq!(entry.subjects.len(), 5);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    match Arc::try_unwrap(registry) {
        Ok(registry) => registry.shutdown().await,
        Err(_) => panic!("registry still shared"),
    }
}

#[tokio::test]
async fn shutdown_drains_every_live_worker() {
    let journal = Arc::new(MemoryJournal::new());
    let ids = ["ns:alpha", "ns:beta", "ns:gamma"].map(|raw| PolicyId::new(raw).unwrap());

    let registry = PolicyRegistry::new(
        VaultConfig::new(),
        journal.clone(),
        Arc::new(MemorySnapshots::new()),
        Arc::new(NoopPublisher),
    )
    .unwrap();
    for id in &ids {
        assert_eq!(create(&registry, id).await, 1);
    }
    registry.shutdown().await;

    // Everything written before the shutdown is still recoverable.
    let reopened = PolicyRegistry::new(
        VaultConfig::new(),
        journal,
        Arc::new(MemorySnapshots::new()),
        Arc::new(NoopPublisher),
    )
    .unwrap();
    for id in &ids {
        let retrieved = reopened
            .send(CommandEnvelope::new(id.clone(), PolicyCommand::Retrieve))
            .await
            .unwrap();
        assert_eq!(retrieved.revision, 1);
    }
    reopened.shutdown().await;
}
