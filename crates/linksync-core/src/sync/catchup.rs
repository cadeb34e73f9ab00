//! Catch-Up Reconciler
//!
//! Brings the local store up to date after a period offline:
//!
//! 1. updates since the watermark (creations and modifications)
//! 2. tombstones since the same watermark
//! 3. re-queue creations for local records the remote has never seen
//!
//! Tombstones are only fetched once updates were applied, so a deletion can
//! never be resurrected by an older update in the same run. The unsynced
//! sweep only runs after both phases, so it never re-creates something the
//! remote just deleted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::operation::{EventClass, Operation};
use crate::queue::PendingQueue;
use crate::remote::{ChangeEvent, RemoteTransport, Tombstone};
use crate::storage::RecordStore;
use crate::types::{EntityKind, LocalId, Record, Timestamp};

use super::applier::{BatchReport, RemoteEventApplier};
use super::events::SyncEvent;

/// Result of one catch-up phase
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PhaseReport {
    /// Skipped because an earlier phase failed
    #[default]
    NotRun,
    /// The fetch failed; nothing was applied
    Failed(String),
    Completed(BatchReport),
}

impl PhaseReport {
    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseReport::Completed(_))
    }
}

/// Outcome of a full catch-up run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CatchUpReport {
    /// Watermark the run fetched from
    pub since: Timestamp,
    pub updates: PhaseReport,
    pub tombstones: PhaseReport,
    /// Creations re-queued for unsynced local records
    pub requeued: usize,
}

impl CatchUpReport {
    pub fn is_complete(&self) -> bool {
        self.updates.is_completed() && self.tombstones.is_completed()
    }
}

#[derive(Clone)]
pub struct CatchUpReconciler {
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteTransport>,
    ctx: SyncContext,
    queue: PendingQueue,
    applier: RemoteEventApplier,
}

impl CatchUpReconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteTransport>,
        ctx: SyncContext,
        applier: RemoteEventApplier,
    ) -> Self {
        Self {
            queue: PendingQueue::new(store.clone()),
            store,
            remote,
            ctx,
            applier,
        }
    }

    pub async fn run(&self) -> SyncResult<CatchUpReport> {
        let since = self.ctx.watermark.get();
        let mut report = CatchUpReport {
            since,
            ..CatchUpReport::default()
        };
        debug!(since, "Starting catch-up");

        report.updates = match self.remote.fetch_updates(since).await {
            Ok(events) => PhaseReport::Completed(self.applier.apply_batch(&events)),
            Err(e) => {
                warn!(error = %e, "Fetching updates failed");
                PhaseReport::Failed(e.to_string())
            }
        };

        if report.updates.is_completed() {
            report.tombstones = match self.remote.fetch_tombstones(since).await {
                Ok(tombstones) => {
                    let events: Vec<ChangeEvent> =
                        tombstones.into_iter().map(Tombstone::into_event).collect();
                    PhaseReport::Completed(self.applier.apply_batch(&events))
                }
                Err(e) => {
                    warn!(error = %e, "Fetching tombstones failed");
                    PhaseReport::Failed(e.to_string())
                }
            };
        }

        if report.is_complete() {
            report.requeued = self.requeue_unsynced()?;
        }

        info!(
            since,
            watermark = self.ctx.watermark.get(),
            complete = report.is_complete(),
            requeued = report.requeued,
            "Catch-up finished"
        );
        self.ctx.emit(SyncEvent::CaughtUp(report.clone()));
        Ok(report)
    }

    /// Queue a creation for every local record without a remote id that has
    /// none queued already. Dependencies go first.
    fn requeue_unsynced(&self) -> SyncResult<usize> {
        let pending = self.pending_creations()?;
        let mut requeued = 0;

        for kind in EntityKind::DEPENDENCY_ORDER {
            let mut records = self.store.list_unsynced(kind)?;
            if kind == EntityKind::Folder {
                sort_parent_first(&mut records);
            }
            for record in records {
                if pending.contains(&(kind, record.local_id())) {
                    continue;
                }
                let Some(op) = Operation::recreate(&record) else {
                    warn!(
                        %kind,
                        local_id = %record.local_id(),
                        "Unsynced record has dangling references"
                    );
                    continue;
                };
                self.queue.enqueue(&op)?;
                debug!(%kind, local_id = %record.local_id(), "Re-queued creation");
                requeued += 1;
            }
        }

        if requeued > 0 {
            self.ctx.emit(SyncEvent::QueueDepthChanged {
                pending: self.queue.len()?,
            });
        }
        Ok(requeued)
    }

    fn pending_creations(&self) -> SyncResult<HashSet<(EntityKind, LocalId)>> {
        let mut pending = HashSet::new();
        for entry in self.queue.dequeue_all()? {
            if entry.kind.class() != EventClass::Create {
                continue;
            }
            if let Some(subject) = PendingQueue::decode(&entry).ok().and_then(|op| op.subject()) {
                pending.insert(subject);
            }
        }
        Ok(pending)
    }
}

/// Order folders so every parent precedes its children.
fn sort_parent_first(records: &mut [Record]) {
    let parents: HashMap<LocalId, Option<LocalId>> = records
        .iter()
        .filter_map(|r| match r {
            Record::Folder(f) => Some((f.meta.local_id, f.parent.and_then(|p| p.local()))),
            _ => None,
        })
        .collect();

    let depth = |id: LocalId| {
        let mut seen = HashSet::new();
        let mut depth = 0usize;
        let mut cursor = parents.get(&id).copied().flatten();
        while let Some(parent) = cursor {
            if !seen.insert(parent) {
                break;
            }
            depth += 1;
            cursor = parents.get(&parent).copied().flatten();
        }
        depth
    };

    records.sort_by_key(|r| (depth(r.local_id()), r.local_id()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Correlation;
    use crate::gateway::MutationGateway;
    use crate::operation::FolderFields;
    use crate::remote::InMemoryRemote;
    use crate::storage::MemoryStore;
    use crate::translate::IdTranslator;
    use crate::types::{LocalRef, RemoteId};

    struct Harness {
        store: Arc<dyn RecordStore>,
        remote: Arc<InMemoryRemote>,
        ctx: SyncContext,
        gateway: MutationGateway,
        reconciler: CatchUpReconciler,
    }

    fn harness() -> Harness {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let remote = Arc::new(InMemoryRemote::new());
        let ctx = SyncContext::new(store.clone(), Correlation::generate("me"), 64).unwrap();
        let gateway = MutationGateway::new(store.clone(), remote.clone(), ctx.clone());
        let applier =
            RemoteEventApplier::new(gateway.clone(), IdTranslator::new(store.clone()), ctx.clone());
        let reconciler =
            CatchUpReconciler::new(store.clone(), remote.clone(), ctx.clone(), applier);
        Harness {
            store,
            remote,
            ctx,
            gateway,
            reconciler,
        }
    }

    fn foreign_folder(remote: &InMemoryRemote, name: &str, parent: Option<RemoteId>) -> RemoteId {
        let mut folder = FolderFields::named(name);
        folder.parent = parent;
        remote
            .inject(
                Operation::CreateFolder { id: None, folder },
                Correlation::generate("other"),
            )
            .unwrap()
            .remote_id
            .unwrap()
    }

    #[tokio::test]
    async fn test_pulls_foreign_changes_and_tombstones() {
        let h = harness();
        let parent = foreign_folder(&h.remote, "Parent", None);
        foreign_folder(&h.remote, "Child", Some(parent));
        let doomed = foreign_folder(&h.remote, "Doomed", None);
        h.remote
            .inject(Operation::DeleteFolder { id: doomed }, Correlation::generate("other"))
            .unwrap();

        let report = h.reconciler.run().await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.since, 0);

        let folders = h.store.list(EntityKind::Folder).unwrap();
        assert_eq!(folders.len(), 2);
        let child = h
            .store
            .get_by_remote_id(EntityKind::Folder, RemoteId(parent.0 + 1))
            .unwrap()
            .unwrap()
            .into_folder()
            .unwrap();
        let parent_local = h.store.local_id_for(EntityKind::Folder, parent).unwrap().unwrap();
        assert_eq!(child.parent, Some(LocalRef::Local(parent_local)));
        assert!(h.ctx.watermark.get() > 0);
    }

    #[tokio::test]
    async fn test_second_run_fetches_nothing_new() {
        let h = harness();
        foreign_folder(&h.remote, "A", None);
        h.reconciler.run().await.unwrap();

        let again = h.reconciler.run().await.unwrap();
        assert_eq!(again.updates, PhaseReport::Completed(BatchReport::default()));
        assert_eq!(h.store.list(EntityKind::Folder).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_run_changes_nothing() {
        let h = harness();
        h.remote.set_online(false);
        h.gateway.create_folder("Local", None).await.unwrap();
        let queued = h.store.queue_len().unwrap();

        let report = h.reconciler.run().await.unwrap();
        assert!(matches!(report.updates, PhaseReport::Failed(_)));
        assert_eq!(report.tombstones, PhaseReport::NotRun);
        assert_eq!(report.requeued, 0);
        assert_eq!(h.store.queue_len().unwrap(), queued);
    }

    #[tokio::test]
    async fn test_requeues_lost_creations_parent_first() {
        let h = harness();
        h.remote.set_online(false);
        let root = h.gateway.create_folder("Root", None).await.unwrap().value;
        let child = h.gateway.create_folder("Child", Some(root)).await.unwrap().value;
        let tag = h.gateway.create_tag("rust").await.unwrap().value;
        for entry in h.store.queued().unwrap() {
            h.store.remove_queued(entry.id).unwrap();
        }
        h.remote.set_online(true);

        let report = h.reconciler.run().await.unwrap();
        assert_eq!(report.requeued, 3);

        let subjects: Vec<_> = h
            .store
            .queued()
            .unwrap()
            .iter()
            .map(|e| PendingQueue::decode(e).unwrap().subject().unwrap())
            .collect();
        assert_eq!(
            subjects,
            vec![
                (EntityKind::Tag, tag),
                (EntityKind::Folder, root),
                (EntityKind::Folder, child),
            ]
        );
    }

    #[tokio::test]
    async fn test_does_not_duplicate_queued_creations() {
        let h = harness();
        h.remote.set_online(false);
        h.gateway.create_folder("Queued", None).await.unwrap();
        h.remote.set_online(true);

        let report = h.reconciler.run().await.unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(h.store.queue_len().unwrap(), 1);
    }

    #[test]
    fn test_sort_parent_first_handles_reverse_ids() {
        use crate::types::{Folder, SyncMeta};

        let folder = |id: i64, parent: Option<i64>| {
            let mut meta = SyncMeta::unsynced(0);
            meta.local_id = LocalId(id);
            Record::Folder(Folder {
                meta,
                name: format!("f{}", id),
                note: String::new(),
                parent: parent.map(|p| LocalRef::Local(LocalId(p))),
                archived: false,
            })
        };
        let mut records = vec![folder(1, Some(2)), folder(2, Some(3)), folder(3, None)];
        sort_parent_first(&mut records);
        let order: Vec<i64> = records.iter().map(|r| r.local_id().0).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }
}
