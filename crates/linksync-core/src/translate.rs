//! ID Translator
//!
//! Pure lookups over the record store's id ledger. Every id that crosses the
//! local/remote boundary passes through here.

use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::operation::Operation;
use crate::storage::RecordStore;
use crate::types::{EntityKind, LocalId, LocalRef, RemoteId};

#[derive(Clone)]
pub struct IdTranslator {
    store: Arc<dyn RecordStore>,
}

impl IdTranslator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn to_remote(&self, kind: EntityKind, local: LocalId) -> SyncResult<Option<RemoteId>> {
        self.store.remote_id_for(kind, local)
    }

    pub fn to_local(&self, kind: EntityKind, remote: RemoteId) -> SyncResult<Option<LocalId>> {
        self.store.local_id_for(kind, remote)
    }

    /// Resolve an operation for sending.
    ///
    /// Creation subjects are stripped first: the remote assigns the new id.
    /// Any other local id without a remote counterpart yields
    /// [`SyncError::UnresolvedDependency`].
    pub fn outbound(&self, op: Operation<LocalId>) -> SyncResult<Operation<RemoteId>> {
        op.without_subject().try_map_ids(|kind, local| {
            self.to_remote(kind, local)?
                .ok_or(SyncError::UnresolvedDependency { kind, id: local })
        })
    }

    /// Resolve an inbound operation for local application.
    ///
    /// Remote ids never seen locally become [`LocalRef::Dangling`].
    pub fn inbound(&self, op: Operation<RemoteId>) -> SyncResult<Operation<LocalRef>> {
        op.try_map_ids(|kind, remote| {
            Ok(match self.to_local(kind, remote)? {
                Some(local) => LocalRef::Local(local),
                None => LocalRef::Dangling(remote),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{FolderFields, LinkFields};
    use crate::storage::MemoryStore;
    use crate::types::{Folder, LinkScope, Record, SyncMeta};

    fn translator_with_folder(remote: Option<RemoteId>) -> (IdTranslator, LocalId) {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let local = store
            .insert(Record::Folder(Folder {
                meta: SyncMeta::unsynced(1),
                name: "Parent".into(),
                note: String::new(),
                parent: None,
                archived: false,
            }))
            .unwrap();
        if let Some(remote) = remote {
            store
                .assign_remote_id(EntityKind::Folder, local, remote)
                .unwrap();
        }
        (IdTranslator::new(store), local)
    }

    #[test]
    fn test_outbound_resolves_and_strips_subject() {
        let (translator, parent) = translator_with_folder(Some(RemoteId(501)));
        let op = Operation::CreateFolder {
            id: Some(LocalId(42)),
            folder: FolderFields::named("Child").under(parent),
        };
        let out = translator.outbound(op).unwrap();
        assert_eq!(
            out,
            Operation::CreateFolder {
                id: None,
                folder: FolderFields::named("Child").under(RemoteId(501)),
            }
        );
    }

    #[test]
    fn test_outbound_reports_unresolved_dependency() {
        let (translator, parent) = translator_with_folder(None);
        let op = Operation::CreateLink {
            id: None,
            link: LinkFields::new("Docs", "https://docs.rs").in_scope(LinkScope::Folder(parent)),
        };
        match translator.outbound(op) {
            Err(SyncError::UnresolvedDependency { kind, id }) => {
                assert_eq!(kind, EntityKind::Folder);
                assert_eq!(id, parent);
            }
            other => panic!("expected unresolved dependency, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_marks_unknown_ids_dangling() {
        let (translator, parent) = translator_with_folder(Some(RemoteId(501)));
        let op = Operation::MoveFolder {
            id: RemoteId(900),
            parent: Some(RemoteId(501)),
        };
        assert_eq!(
            translator.inbound(op).unwrap(),
            Operation::MoveFolder {
                id: LocalRef::Dangling(RemoteId(900)),
                parent: Some(LocalRef::Local(parent)),
            }
        );
    }

    #[test]
    fn test_round_trip() {
        let (translator, local) = translator_with_folder(Some(RemoteId(501)));
        let remote = translator.to_remote(EntityKind::Folder, local).unwrap().unwrap();
        assert_eq!(translator.to_local(EntityKind::Folder, remote).unwrap(), Some(local));
    }
}
