//! Pending Operation Queue
//!
//! Append-only FIFO of operations that could not be mirrored immediately.
//! Payloads are JSON-encoded `Operation<LocalId>`: local ids are kept so
//! they can be re-resolved at drain time.

use std::sync::Arc;

use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::operation::{EventClass, Operation};
use crate::storage::{QueueEntry, RecordStore};
use crate::types::{EntityKind, LocalId};

#[derive(Clone)]
pub struct PendingQueue {
    store: Arc<dyn RecordStore>,
}

impl PendingQueue {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn enqueue(&self, op: &Operation<LocalId>) -> SyncResult<QueueEntry> {
        let payload =
            serde_json::to_string(op).map_err(|e| SyncError::Serialization(e.to_string()))?;
        let entry = self.store.enqueue(op.kind(), payload)?;
        debug!(queue_id = entry.id, kind = %entry.kind, "Enqueued operation");
        Ok(entry)
    }

    /// Every entry, oldest first.
    pub fn dequeue_all(&self) -> SyncResult<Vec<QueueEntry>> {
        self.store.queued()
    }

    pub fn remove(&self, id: u64) -> SyncResult<bool> {
        self.store.remove_queued(id)
    }

    pub fn len(&self) -> SyncResult<usize> {
        self.store.queue_len()
    }

    pub fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reconstruct the operation stored in an entry.
    pub fn decode(entry: &QueueEntry) -> SyncResult<Operation<LocalId>> {
        let op: Operation<LocalId> = serde_json::from_str(&entry.payload)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        if op.kind() != entry.kind {
            return Err(SyncError::Serialization(format!(
                "queue entry {} is tagged {} but holds {}",
                entry.id,
                entry.kind,
                op.kind()
            )));
        }
        Ok(op)
    }

    /// Whether a creation of the given entity is already waiting.
    pub fn has_pending_create(&self, kind: EntityKind, local: LocalId) -> SyncResult<bool> {
        for entry in self.dequeue_all()? {
            if entry.kind.class() != EventClass::Create {
                continue;
            }
            if let Ok(op) = Self::decode(&entry) {
                if op.subject() == Some((kind, local)) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
