//! Remote Event Applier
//!
//! Applies change events from the remote authority to the record store
//! without re-mirroring them. Used for the live subscription and for both
//! catch-up phases.

use tracing::{debug, warn};

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::gateway::{LocalEffect, MutationGateway};
use crate::remote::ChangeEvent;
use crate::translate::IdTranslator;

use super::events::SyncEvent;

/// What happened to one inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Our own change coming back; only the watermark moved
    Echo,
    Applied(LocalEffect),
    /// Skipped after an error; later events are unaffected
    Failed(String),
}

/// Tally of a batch of inbound events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Events that changed the store
    pub applied: usize,
    /// Stale or already-absent targets
    pub unchanged: usize,
    pub echoes: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Echo => self.echoes += 1,
            ApplyOutcome::Applied(effect) if effect.is_write() => self.applied += 1,
            ApplyOutcome::Applied(_) => self.unchanged += 1,
            ApplyOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.unchanged + self.echoes + self.failed
    }
}

#[derive(Clone)]
pub struct RemoteEventApplier {
    gateway: MutationGateway,
    translator: IdTranslator,
    ctx: SyncContext,
}

impl RemoteEventApplier {
    pub fn new(gateway: MutationGateway, translator: IdTranslator, ctx: SyncContext) -> Self {
        Self {
            gateway,
            translator,
            ctx,
        }
    }

    /// Apply one event, propagating any failure.
    ///
    /// The watermark advances for every event that did not fail, including
    /// echoes and events that left the store unchanged.
    pub fn try_apply(&self, event: &ChangeEvent) -> SyncResult<ApplyOutcome> {
        if event.correlation.same_client(&self.ctx.correlation) {
            debug!(op = %event.kind(), event_timestamp = event.event_timestamp, "Skipping echo");
            self.ctx.watermark.advance(event.event_timestamp)?;
            return Ok(ApplyOutcome::Echo);
        }

        let op = self.translator.inbound(event.operation.clone())?;
        let effect = self.gateway.apply_inbound(&op, event.event_timestamp)?;
        self.ctx.watermark.advance(event.event_timestamp)?;

        if effect.is_write() {
            debug!(
                op = %event.kind(),
                from = %event.correlation,
                event_timestamp = event.event_timestamp,
                "Applied remote change"
            );
            self.ctx.emit(SyncEvent::RemoteApplied {
                kind: event.kind(),
                event_timestamp: event.event_timestamp,
            });
        }
        Ok(ApplyOutcome::Applied(effect))
    }

    /// Apply one event. Failures are logged and reported, never returned.
    pub fn apply(&self, event: &ChangeEvent) -> ApplyOutcome {
        match self.try_apply(event) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    op = %event.kind(),
                    event_timestamp = event.event_timestamp,
                    error = %e,
                    "Failed to apply remote change, skipping"
                );
                self.ctx.emit(SyncEvent::ApplyFailed {
                    kind: event.kind(),
                    event_timestamp: event.event_timestamp,
                    message: e.to_string(),
                });
                ApplyOutcome::Failed(e.to_string())
            }
        }
    }

    /// Apply events in order, isolating per-event failures.
    pub fn apply_batch(&self, events: &[ChangeEvent]) -> BatchReport {
        let mut report = BatchReport::default();
        for event in events {
            report.record(&self.apply(event));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::Correlation;
    use crate::operation::{FolderFields, Operation};
    use crate::remote::InMemoryRemote;
    use crate::storage::{MemoryStore, RecordStore};
    use crate::types::{EntityKind, LocalRef, RemoteId};

    struct Harness {
        store: Arc<dyn RecordStore>,
        ctx: SyncContext,
        applier: RemoteEventApplier,
    }

    fn harness() -> Harness {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let remote = Arc::new(InMemoryRemote::new());
        let ctx = SyncContext::new(store.clone(), Correlation::generate("me"), 16).unwrap();
        let gateway = MutationGateway::new(store.clone(), remote, ctx.clone());
        let applier =
            RemoteEventApplier::new(gateway, IdTranslator::new(store.clone()), ctx.clone());
        Harness {
            store,
            ctx,
            applier,
        }
    }

    fn event(operation: Operation<RemoteId>, correlation: &Correlation, ts: i64) -> ChangeEvent {
        ChangeEvent {
            operation,
            correlation: correlation.clone(),
            event_timestamp: ts,
        }
    }

    fn create_folder(id: i64, name: &str, parent: Option<i64>) -> Operation<RemoteId> {
        let mut folder = FolderFields::named(name);
        folder.parent = parent.map(RemoteId);
        Operation::CreateFolder {
            id: Some(RemoteId(id)),
            folder,
        }
    }

    #[test]
    fn test_echo_only_moves_watermark() {
        let h = harness();
        let echo = event(create_folder(501, "Mine", None), &h.ctx.correlation, 10);

        assert_eq!(h.applier.apply(&echo), ApplyOutcome::Echo);
        assert!(h.store.list(EntityKind::Folder).unwrap().is_empty());
        assert_eq!(h.ctx.watermark.get(), 10);
    }

    #[test]
    fn test_foreign_create_is_mirrored_locally() {
        let h = harness();
        let other = Correlation::generate("other");
        let outcome = h.applier.apply(&event(create_folder(501, "Theirs", None), &other, 10));

        let ApplyOutcome::Applied(LocalEffect::Created(local)) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        let record = h.store.get(EntityKind::Folder, local).unwrap().unwrap();
        assert_eq!(record.remote_id(), Some(RemoteId(501)));
        assert_eq!(record.meta().synced_at, Some(10));
    }

    #[test]
    fn test_delete_of_unknown_entity_is_noop() {
        let h = harness();
        let other = Correlation::generate("other");
        let outcome = h.applier.apply(&event(
            Operation::DeleteFolder { id: RemoteId(777) },
            &other,
            12,
        ));
        assert_eq!(outcome, ApplyOutcome::Applied(LocalEffect::NotFound));
        assert_eq!(h.ctx.watermark.get(), 12);
    }

    #[test]
    fn test_dangling_parent_resolves_when_parent_arrives() {
        let h = harness();
        let other = Correlation::generate("other");
        let batch = [
            event(create_folder(502, "Child", Some(501)), &other, 20),
            event(create_folder(501, "Parent", None), &other, 10),
        ];
        let report = h.applier.apply_batch(&batch);
        assert_eq!(report.applied, 2);

        let child = h
            .store
            .get_by_remote_id(EntityKind::Folder, RemoteId(502))
            .unwrap()
            .unwrap()
            .into_folder()
            .unwrap();
        let parent = h
            .store
            .local_id_for(EntityKind::Folder, RemoteId(501))
            .unwrap()
            .unwrap();
        assert_eq!(child.parent, Some(LocalRef::Local(parent)));
    }

    #[test]
    fn test_failed_event_does_not_stop_batch() {
        let h = harness();
        let other = Correlation::generate("other");
        h.applier.apply_batch(&[
            event(create_folder(501, "Outer", None), &other, 1),
            event(create_folder(502, "Inner", Some(501)), &other, 2),
        ]);

        let batch = [
            event(
                Operation::MoveFolder {
                    id: RemoteId(501),
                    parent: Some(RemoteId(502)),
                },
                &other,
                5,
            ),
            event(create_folder(503, "Fine", None), &other, 6),
        ];
        let mut events = h.ctx.subscribe();
        let report = h.applier.apply_batch(&batch);
        assert_eq!(report.failed, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(report.total(), 2);
        assert!(matches!(
            events.try_recv().unwrap(),
            SyncEvent::ApplyFailed { .. }
        ));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let h = harness();
        let other = Correlation::generate("other");
        let create = event(create_folder(501, "Once", None), &other, 10);
        h.applier.apply(&create);
        h.applier.apply(&create);
        assert_eq!(h.store.list(EntityKind::Folder).unwrap().len(), 1);
    }
}
