//! Durable record store on redb.
//!
//! Layout:
//! - `records`: `(kind, local id)` → postcard-encoded [`Record`]
//! - `to_remote` / `to_local`: the id ledger, keyed by `(kind, id)`
//! - `queue`: queue id → postcard-encoded [`QueueEntry`]
//! - `meta`: counters and the watermark

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{QueueEntry, RecordStore};
use crate::error::{SyncError, SyncResult};
use crate::operation::OperationKind;
use crate::types::{self, EntityKind, LocalId, Record, RemoteId, Timestamp};

const RECORDS_TABLE: TableDefinition<(u8, i64), &[u8]> = TableDefinition::new("records");
const TO_REMOTE_TABLE: TableDefinition<(u8, i64), i64> = TableDefinition::new("to_remote");
const TO_LOCAL_TABLE: TableDefinition<(u8, i64), i64> = TableDefinition::new("to_local");
const QUEUE_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("queue");
const META_TABLE: TableDefinition<&str, i64> = TableDefinition::new("meta");

const WATERMARK_KEY: &str = "watermark";
const NEXT_LOCAL_ID_KEY: &str = "next_local_id";
const NEXT_QUEUE_ID_KEY: &str = "next_queue_id";

fn kind_code(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::Folder => 0,
        EntityKind::Link => 1,
        EntityKind::Tag => 2,
        EntityKind::Panel => 3,
        EntityKind::PanelFolder => 4,
    }
}

fn encode<T: Serialize>(value: &T) -> SyncResult<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| SyncError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SyncResult<T> {
    postcard::from_bytes(bytes).map_err(|e| SyncError::Serialization(e.to_string()))
}

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
}

impl Storage {
    /// Open or create the database at `path`, creating parent directories
    /// and every table.
    pub fn new(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RECORDS_TABLE)?;
            let _ = write_txn.open_table(TO_REMOTE_TABLE)?;
            let _ = write_txn.open_table(TO_LOCAL_TABLE)?;
            let _ = write_txn.open_table(QUEUE_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
        }
        write_txn.commit()?;

        debug!(path = %path.display(), "Opened record store");

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Run `f` inside a single write transaction and commit it.
    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> SyncResult<T>) -> SyncResult<T> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let value = f(&write_txn)?;
        write_txn.commit()?;
        Ok(value)
    }

    fn next_counter(write_txn: &WriteTransaction, key: &str) -> SyncResult<i64> {
        let mut meta = write_txn.open_table(META_TABLE)?;
        let next = meta.get(key)?.map(|v| v.value()).unwrap_or(1);
        meta.insert(key, next + 1)?;
        Ok(next)
    }
}

impl RecordStore for Storage {
    fn get(&self, kind: EntityKind, id: LocalId) -> SyncResult<Option<Record>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        match table.get((kind_code(kind), id.0))? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    fn insert(&self, mut record: Record) -> SyncResult<LocalId> {
        let kind = record.kind();
        let code = kind_code(kind);
        self.write(|txn| {
            let local = LocalId(Self::next_counter(txn, NEXT_LOCAL_ID_KEY)?);
            record.meta_mut().local_id = local;

            if let Some(remote) = record.remote_id() {
                let mut to_local = txn.open_table(TO_LOCAL_TABLE)?;
                if let Some(existing) = to_local.get((code, remote.0))?.map(|v| v.value()) {
                    return Err(SyncError::Storage(format!(
                        "{} {} is already bound to local id {}",
                        kind, remote, existing
                    )));
                }
                to_local.insert((code, remote.0), local.0)?;
                let mut to_remote = txn.open_table(TO_REMOTE_TABLE)?;
                to_remote.insert((code, local.0), remote.0)?;
            }

            let mut records = txn.open_table(RECORDS_TABLE)?;
            let data = encode(&record)?;
            records.insert((code, local.0), data.as_slice())?;
            Ok(local)
        })
    }

    fn update(&self, record: &Record) -> SyncResult<()> {
        let kind = record.kind();
        let key = (kind_code(kind), record.local_id().0);
        self.write(|txn| {
            let mut records = txn.open_table(RECORDS_TABLE)?;
            if records.get(key)?.is_none() {
                return Err(SyncError::NotFound {
                    kind,
                    id: record.local_id(),
                });
            }
            let data = encode(record)?;
            records.insert(key, data.as_slice())?;
            Ok(())
        })
    }

    fn delete(&self, kind: EntityKind, id: LocalId) -> SyncResult<bool> {
        self.write(|txn| {
            let mut records = txn.open_table(RECORDS_TABLE)?;
            let removed = records.remove((kind_code(kind), id.0))?.is_some();
            Ok(removed)
        })
    }

    fn list(&self, kind: EntityKind) -> SyncResult<Vec<Record>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;
        let code = kind_code(kind);

        let mut records = Vec::new();
        for entry in table.range((code, i64::MIN)..=(code, i64::MAX))? {
            let (_, value) = entry?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }

    fn remote_id_for(&self, kind: EntityKind, local: LocalId) -> SyncResult<Option<RemoteId>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TO_REMOTE_TABLE)?;
        Ok(table
            .get((kind_code(kind), local.0))?
            .map(|v| RemoteId(v.value())))
    }

    fn local_id_for(&self, kind: EntityKind, remote: RemoteId) -> SyncResult<Option<LocalId>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(TO_LOCAL_TABLE)?;
        Ok(table
            .get((kind_code(kind), remote.0))?
            .map(|v| LocalId(v.value())))
    }

    fn assign_remote_id(
        &self,
        kind: EntityKind,
        local: LocalId,
        remote: RemoteId,
    ) -> SyncResult<()> {
        let code = kind_code(kind);
        self.write(|txn| {
            let mut to_remote = txn.open_table(TO_REMOTE_TABLE)?;
            match to_remote.get((code, local.0))?.map(|v| RemoteId(v.value())) {
                Some(existing) if existing == remote => return Ok(()),
                Some(existing) => {
                    return Err(SyncError::RemoteIdConflict {
                        kind,
                        local,
                        existing,
                        proposed: remote,
                    })
                }
                None => {}
            }
            to_remote.insert((code, local.0), remote.0)?;

            let mut to_local = txn.open_table(TO_LOCAL_TABLE)?;
            to_local.insert((code, remote.0), local.0)?;

            let mut records = txn.open_table(RECORDS_TABLE)?;
            let current = records.get((code, local.0))?.map(|v| v.value().to_vec());
            if let Some(bytes) = current {
                let mut record: Record = decode(&bytes)?;
                record.meta_mut().remote_id = Some(remote);
                let data = encode(&record)?;
                records.insert((code, local.0), data.as_slice())?;
            }
            Ok(())
        })
    }

    fn enqueue(&self, kind: OperationKind, payload: String) -> SyncResult<QueueEntry> {
        self.write(|txn| {
            let id = Self::next_counter(txn, NEXT_QUEUE_ID_KEY)? as u64;
            let entry = QueueEntry {
                id,
                kind,
                payload,
                enqueued_at: types::now(),
            };
            let mut queue = txn.open_table(QUEUE_TABLE)?;
            let data = encode(&entry)?;
            queue.insert(id, data.as_slice())?;
            Ok(entry)
        })
    }

    fn queued(&self) -> SyncResult<Vec<QueueEntry>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(QUEUE_TABLE)?;

        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            entries.push(decode(value.value())?);
        }
        Ok(entries)
    }

    fn remove_queued(&self, id: u64) -> SyncResult<bool> {
        self.write(|txn| {
            let mut queue = txn.open_table(QUEUE_TABLE)?;
            let removed = queue.remove(id)?.is_some();
            Ok(removed)
        })
    }

    fn queue_len(&self) -> SyncResult<usize> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(QUEUE_TABLE)?;
        Ok(table.len()? as usize)
    }

    fn watermark(&self) -> SyncResult<Timestamp> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;
        Ok(table.get(WATERMARK_KEY)?.map(|v| v.value()).unwrap_or(0))
    }

    fn advance_watermark(&self, proposed: Timestamp) -> SyncResult<Timestamp> {
        self.write(|txn| {
            let mut meta = txn.open_table(META_TABLE)?;
            let current = meta.get(WATERMARK_KEY)?.map(|v| v.value()).unwrap_or(0);
            let next = current.max(proposed);
            if next != current {
                meta.insert(WATERMARK_KEY, next)?;
            }
            Ok(next)
        })
    }
}
