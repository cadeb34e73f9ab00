//! Queue Drain Service
//!
//! Replays the Pending Operation Queue against the remote authority, oldest
//! entry first. Local ids are re-resolved right before each send.
//!
//! Per pass:
//! - an entry whose dependencies are still unmirrored is skipped and kept
//! - a transient failure keeps the entry and moves on to the next one
//! - a semantic rejection drops the entry; catch-up corrects local state
//! - later entries touching an entity whose earlier entry was kept are
//!   deferred to the next pass, so each entity's operations reach the remote
//!   in the order they were issued
//!
//! Cancellation is only observed between entries.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::gateway::confirm_mirrored;
use crate::queue::PendingQueue;
use crate::remote::{RemoteRequest, RemoteTransport};
use crate::storage::RecordStore;
use crate::translate::IdTranslator;
use crate::types::{EntityKind, LocalId};

use super::events::SyncEvent;

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries looked at
    pub attempted: usize,
    /// Entries mirrored and removed
    pub mirrored: usize,
    /// Entries removed without mirroring (rejected or undecodable)
    pub dropped: usize,
    /// Entries kept because a dependency or earlier entry is pending
    pub deferred: usize,
    /// Entries kept after a transient failure
    pub failed: usize,
    /// Queue depth after the pass
    pub remaining: usize,
    pub cancelled: bool,
}

/// RAII guard to reset the draining flag.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct QueueDrainService {
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteTransport>,
    ctx: SyncContext,
    queue: PendingQueue,
    translator: IdTranslator,
    draining: Arc<AtomicBool>,
}

impl QueueDrainService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteTransport>,
        ctx: SyncContext,
    ) -> Self {
        Self {
            queue: PendingQueue::new(store.clone()),
            translator: IdTranslator::new(store.clone()),
            store,
            remote,
            ctx,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Run one pass over the queue.
    ///
    /// Only one pass runs at a time; a concurrent call returns an empty
    /// report immediately.
    pub async fn drain(&self, cancel: &CancellationToken) -> SyncResult<DrainReport> {
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("Drain already in progress");
            return Ok(DrainReport::default());
        }
        let _guard = DrainGuard(&self.draining);

        let entries = self.queue.dequeue_all()?;
        let mut report = DrainReport::default();
        // Entities whose later entries must wait for the next pass
        let mut blocked: HashSet<(EntityKind, LocalId)> = HashSet::new();
        // Entities with entries skipped because they were not mirrored yet
        let mut unmirrored: HashSet<(EntityKind, LocalId)> = HashSet::new();

        for entry in entries {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.attempted += 1;

            let op = match PendingQueue::decode(&entry) {
                Ok(op) => op,
                Err(e) => {
                    error!(
                        queue_id = entry.id,
                        kind = %entry.kind,
                        error = %e,
                        "Dropping undecodable queue entry"
                    );
                    self.queue.remove(entry.id)?;
                    report.dropped += 1;
                    continue;
                }
            };
            let targets = op.targets();

            if targets.iter().any(|t| blocked.contains(t)) {
                blocked.extend(targets);
                report.deferred += 1;
                continue;
            }

            let outbound = match self.translator.outbound(op.clone()) {
                Ok(outbound) => outbound,
                Err(SyncError::UnresolvedDependency { kind, id }) => {
                    debug!(
                        queue_id = entry.id,
                        %kind,
                        %id,
                        "Dependency not mirrored yet, deferring"
                    );
                    if targets.contains(&(kind, id)) {
                        unmirrored.extend(targets);
                    } else {
                        blocked.extend(targets);
                    }
                    report.deferred += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let request = RemoteRequest {
                operation: outbound,
                correlation: self.ctx.correlation.clone(),
                event_timestamp: entry.enqueued_at,
            };
            match self.remote.send(request).await {
                Ok(response) => {
                    confirm_mirrored(self.store.as_ref(), &self.ctx, &op, response)?;
                    self.queue.remove(entry.id)?;
                    report.mirrored += 1;
                    // Operations skipped earlier in this pass for the entity
                    // just created must go out before any later ones.
                    if let Some(subject) = op.subject().filter(|_| op.created_kind().is_some()) {
                        if unmirrored.contains(&subject) {
                            blocked.insert(subject);
                        }
                    }
                }
                Err(e) if e.is_semantic() => {
                    warn!(
                        queue_id = entry.id,
                        kind = %entry.kind,
                        error = %e,
                        "Remote rejected queued operation, dropping"
                    );
                    self.queue.remove(entry.id)?;
                    report.dropped += 1;
                }
                Err(e) => {
                    debug!(
                        queue_id = entry.id,
                        kind = %entry.kind,
                        error = %e,
                        "Replay failed, keeping entry"
                    );
                    blocked.extend(targets);
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.queue.len()?;
        info!(
            mirrored = report.mirrored,
            dropped = report.dropped,
            deferred = report.deferred,
            failed = report.failed,
            remaining = report.remaining,
            cancelled = report.cancelled,
            "Drain pass finished"
        );
        self.ctx.emit(SyncEvent::QueueDepthChanged {
            pending: report.remaining,
        });
        self.ctx.emit(SyncEvent::Drained(report.clone()));
        Ok(report)
    }
}
