//! Record Store
//!
//! The engine treats persistence as an opaque keyed store exposing:
//! - CRUD over the five synchronized entity kinds
//! - the id ledger (local id ↔ remote id per kind)
//! - the Pending Operation Queue table
//! - the synchronization watermark
//!
//! Two implementations are provided: [`Storage`] on redb for durable
//! clients and [`MemoryStore`] for tests and ephemeral sessions.

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::operation::OperationKind;
use crate::types::{EntityKind, LocalId, Record, RemoteId, Timestamp};

mod disk;
mod memory;

pub use disk::Storage;
pub use memory::MemoryStore;

/// A persisted Pending Operation Queue entry.
///
/// Entries are never mutated in place: they are appended by `enqueue` and
/// destroyed by `remove_queued`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Queue-local sequence number; strictly increasing
    pub id: u64,
    pub kind: OperationKind,
    /// Serialized operation carrying local ids
    pub payload: String,
    pub enqueued_at: Timestamp,
}

/// Durable keyed storage consumed by every engine component.
///
/// Implementations are the serialization point for concurrent writers; each
/// method is atomic on its own.
pub trait RecordStore: Send + Sync {
    fn get(&self, kind: EntityKind, id: LocalId) -> SyncResult<Option<Record>>;

    fn get_by_remote_id(&self, kind: EntityKind, remote: RemoteId) -> SyncResult<Option<Record>> {
        match self.local_id_for(kind, remote)? {
            Some(local) => self.get(kind, local),
            None => Ok(None),
        }
    }

    /// Insert a new record, assigning it a fresh local id.
    ///
    /// A record that already carries a remote id is entered into the ledger
    /// in the same write.
    fn insert(&self, record: Record) -> SyncResult<LocalId>;

    /// Overwrite an existing record. Fails with `NotFound` if it is absent.
    fn update(&self, record: &Record) -> SyncResult<()>;

    /// Remove a record. Ledger entries are kept. Returns whether it existed.
    fn delete(&self, kind: EntityKind, id: LocalId) -> SyncResult<bool>;

    /// All records of a kind in local id order.
    fn list(&self, kind: EntityKind) -> SyncResult<Vec<Record>>;

    /// Records of a kind that have never been mirrored.
    fn list_unsynced(&self, kind: EntityKind) -> SyncResult<Vec<Record>> {
        Ok(self
            .list(kind)?
            .into_iter()
            .filter(|r| r.remote_id().is_none())
            .collect())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Id ledger
    // ═══════════════════════════════════════════════════════════════════════

    fn remote_id_for(&self, kind: EntityKind, local: LocalId) -> SyncResult<Option<RemoteId>>;

    fn local_id_for(&self, kind: EntityKind, remote: RemoteId) -> SyncResult<Option<LocalId>>;

    /// Bind a remote id to a local entity and stamp it on the record if it
    /// still exists. Re-assigning the same pair is a no-op; a different
    /// remote id for an already bound entity is a `RemoteIdConflict`.
    fn assign_remote_id(
        &self,
        kind: EntityKind,
        local: LocalId,
        remote: RemoteId,
    ) -> SyncResult<()>;

    // ═══════════════════════════════════════════════════════════════════════
    // Pending Operation Queue
    // ═══════════════════════════════════════════════════════════════════════

    fn enqueue(&self, kind: OperationKind, payload: String) -> SyncResult<QueueEntry>;

    /// Every queued entry, oldest first.
    fn queued(&self) -> SyncResult<Vec<QueueEntry>>;

    fn remove_queued(&self, id: u64) -> SyncResult<bool>;

    fn queue_len(&self) -> SyncResult<usize>;

    // ═══════════════════════════════════════════════════════════════════════
    // Watermark
    // ═══════════════════════════════════════════════════════════════════════

    fn watermark(&self) -> SyncResult<Timestamp>;

    /// Move the watermark to `max(current, proposed)` and return the result.
    fn advance_watermark(&self, proposed: Timestamp) -> SyncResult<Timestamp>;
}
