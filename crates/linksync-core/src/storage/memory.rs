//! In-process record store.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use super::{QueueEntry, RecordStore};
use crate::error::{SyncError, SyncResult};
use crate::operation::OperationKind;
use crate::types::{self, EntityKind, LocalId, Record, RemoteId, Timestamp};

#[derive(Default)]
struct Inner {
    records: BTreeMap<(EntityKind, LocalId), Record>,
    to_remote: HashMap<(EntityKind, LocalId), RemoteId>,
    to_local: HashMap<(EntityKind, RemoteId), LocalId>,
    queue: BTreeMap<u64, QueueEntry>,
    watermark: Timestamp,
    last_local_id: i64,
    last_queue_id: u64,
}

/// Record store kept entirely in memory; contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, kind: EntityKind, id: LocalId) -> SyncResult<Option<Record>> {
        Ok(self.inner.read().records.get(&(kind, id)).cloned())
    }

    fn insert(&self, mut record: Record) -> SyncResult<LocalId> {
        let kind = record.kind();
        let mut inner = self.inner.write();

        if let Some(remote) = record.remote_id() {
            if let Some(existing) = inner.to_local.get(&(kind, remote)) {
                return Err(SyncError::Storage(format!(
                    "{} {} is already bound to local id {}",
                    kind, remote, existing
                )));
            }
        }

        inner.last_local_id += 1;
        let local = LocalId(inner.last_local_id);
        record.meta_mut().local_id = local;

        if let Some(remote) = record.remote_id() {
            inner.to_local.insert((kind, remote), local);
            inner.to_remote.insert((kind, local), remote);
        }
        inner.records.insert((kind, local), record);
        Ok(local)
    }

    fn update(&self, record: &Record) -> SyncResult<()> {
        let key = (record.kind(), record.local_id());
        let mut inner = self.inner.write();
        match inner.records.get_mut(&key) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(SyncError::NotFound {
                kind: key.0,
                id: key.1,
            }),
        }
    }

    fn delete(&self, kind: EntityKind, id: LocalId) -> SyncResult<bool> {
        Ok(self.inner.write().records.remove(&(kind, id)).is_some())
    }

    fn list(&self, kind: EntityKind) -> SyncResult<Vec<Record>> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .range((kind, LocalId(i64::MIN))..=(kind, LocalId(i64::MAX)))
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn remote_id_for(&self, kind: EntityKind, local: LocalId) -> SyncResult<Option<RemoteId>> {
        Ok(self.inner.read().to_remote.get(&(kind, local)).copied())
    }

    fn local_id_for(&self, kind: EntityKind, remote: RemoteId) -> SyncResult<Option<LocalId>> {
        Ok(self.inner.read().to_local.get(&(kind, remote)).copied())
    }

    fn assign_remote_id(
        &self,
        kind: EntityKind,
        local: LocalId,
        remote: RemoteId,
    ) -> SyncResult<()> {
        let mut inner = self.inner.write();
        match inner.to_remote.get(&(kind, local)) {
            Some(existing) if *existing == remote => return Ok(()),
            Some(existing) => {
                return Err(SyncError::RemoteIdConflict {
                    kind,
                    local,
                    existing: *existing,
                    proposed: remote,
                })
            }
            None => {}
        }
        inner.to_remote.insert((kind, local), remote);
        inner.to_local.insert((kind, remote), local);
        if let Some(record) = inner.records.get_mut(&(kind, local)) {
            record.meta_mut().remote_id = Some(remote);
        }
        Ok(())
    }

    fn enqueue(&self, kind: OperationKind, payload: String) -> SyncResult<QueueEntry> {
        let mut inner = self.inner.write();
        inner.last_queue_id += 1;
        let entry = QueueEntry {
            id: inner.last_queue_id,
            kind,
            payload,
            enqueued_at: types::now(),
        };
        inner.queue.insert(entry.id, entry.clone());
        Ok(entry)
    }

    fn queued(&self) -> SyncResult<Vec<QueueEntry>> {
        Ok(self.inner.read().queue.values().cloned().collect())
    }

    fn remove_queued(&self, id: u64) -> SyncResult<bool> {
        Ok(self.inner.write().queue.remove(&id).is_some())
    }

    fn queue_len(&self) -> SyncResult<usize> {
        Ok(self.inner.read().queue.len())
    }

    fn watermark(&self) -> SyncResult<Timestamp> {
        Ok(self.inner.read().watermark)
    }

    fn advance_watermark(&self, proposed: Timestamp) -> SyncResult<Timestamp> {
        let mut inner = self.inner.write();
        inner.watermark = inner.watermark.max(proposed);
        Ok(inner.watermark)
    }
}
