//! Local preconditions checked before any write.

use std::collections::HashSet;

use crate::error::{SyncResult, ValidationError};
use crate::operation::{Operation, Selection};
use crate::storage::RecordStore;
use crate::types::{
    EntityKind, LinkScope, LocalId, LocalRef, Record, RESERVED_FOLDER_NAMES, RESERVED_PANEL_NAMES,
};

use super::tree;

fn normalized(name: &str) -> String {
    name.trim().to_lowercase()
}

fn non_blank(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Blank(field))
    } else {
        Ok(())
    }
}

fn not_reserved(name: &str, reserved: &[&str]) -> Result<(), ValidationError> {
    let wanted = normalized(name);
    if reserved.iter().any(|r| normalized(r) == wanted) {
        Err(ValidationError::ReservedName(name.trim().to_string()))
    } else {
        Ok(())
    }
}

/// Checks run against the current store contents.
pub(crate) struct Validator<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> Validator<'a> {
    pub(crate) fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    fn require(&self, kind: EntityKind, id: LocalId) -> SyncResult<Record> {
        self.store
            .get(kind, id)?
            .ok_or_else(|| ValidationError::MissingReference { kind, id }.into())
    }

    fn require_all(&self, kind: EntityKind, ids: &[LocalId]) -> SyncResult<()> {
        for id in ids {
            self.require(kind, *id)?;
        }
        Ok(())
    }

    fn folder_name(&self, name: &str) -> SyncResult<()> {
        non_blank("folder name", name)?;
        not_reserved(name, &RESERVED_FOLDER_NAMES)?;
        Ok(())
    }

    /// No sibling under `parent` other than `exclude` may carry `name`.
    fn unique_folder_name(
        &self,
        name: &str,
        parent: Option<LocalId>,
        exclude: Option<LocalId>,
    ) -> SyncResult<()> {
        let wanted = normalized(name);
        let parent = parent.map(LocalRef::Local);
        let clash = tree::folders(self.store)?.into_iter().any(|f| {
            f.parent == parent && Some(f.meta.local_id) != exclude && normalized(&f.name) == wanted
        });
        if clash {
            return Err(ValidationError::DuplicateName {
                kind: EntityKind::Folder,
                name: name.trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Tag and panel names are unique per kind.
    fn unique_name(
        &self,
        kind: EntityKind,
        name: &str,
        exclude: Option<LocalId>,
    ) -> SyncResult<()> {
        let wanted = normalized(name);
        let clash = self
            .store
            .list(kind)?
            .iter()
            .any(|r| Some(r.local_id()) != exclude && normalized(r.label()) == wanted);
        if clash {
            return Err(ValidationError::DuplicateName {
                kind,
                name: name.trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn parent_of(&self, folder: LocalId) -> SyncResult<Option<LocalId>> {
        match self.require(EntityKind::Folder, folder)? {
            Record::Folder(f) => Ok(f.parent.and_then(|p| p.local())),
            _ => Ok(None),
        }
    }

    fn no_cycle(&self, folder: LocalId, parent: Option<LocalId>) -> SyncResult<()> {
        if let Some(parent) = parent {
            if tree::is_within(self.store, folder, parent)? {
                return Err(ValidationError::Cycle { folder, parent }.into());
            }
        }
        Ok(())
    }

    fn scope(&self, scope: &LinkScope<LocalId>) -> SyncResult<()> {
        if let LinkScope::Folder(folder) = scope {
            self.require(EntityKind::Folder, *folder)?;
        }
        Ok(())
    }

    fn selection(&self, selection: &Selection<LocalId>) -> SyncResult<()> {
        if selection.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }
        self.require_all(EntityKind::Folder, &selection.folders)?;
        self.require_all(EntityKind::Link, &selection.links)
    }

    fn not_attached(&self, panel: LocalId, folder: LocalId) -> SyncResult<()> {
        let attached = self.store.list(EntityKind::PanelFolder)?.iter().any(|r| {
            matches!(r, Record::PanelFolder(pf) if pf.is_on(panel) && pf.pins(folder))
        });
        if attached {
            return Err(ValidationError::AlreadyAttached { panel, folder }.into());
        }
        Ok(())
    }

    /// Full precondition check for a user-issued operation.
    pub(crate) fn user(&self, op: &Operation<LocalId>) -> SyncResult<()> {
        match op {
            Operation::CreateFolder { folder, .. } => {
                self.folder_name(&folder.name)?;
                if let Some(parent) = folder.parent {
                    self.require(EntityKind::Folder, parent)?;
                }
                self.unique_folder_name(&folder.name, folder.parent, None)
            }
            Operation::RenameFolder { id, name } => {
                let parent = self.parent_of(*id)?;
                self.folder_name(name)?;
                self.unique_folder_name(name, parent, Some(*id))
            }
            Operation::MoveFolder { id, parent } => {
                let folder = self.require(EntityKind::Folder, *id)?;
                if let Some(parent) = parent {
                    self.require(EntityKind::Folder, *parent)?;
                }
                self.no_cycle(*id, *parent)?;
                self.unique_folder_name(folder.label(), *parent, Some(*id))
            }
            Operation::UpdateFolderNote { id, .. }
            | Operation::ArchiveFolder { id }
            | Operation::UnarchiveFolder { id }
            | Operation::DeleteFolder { id } => self.require(EntityKind::Folder, *id).map(drop),

            Operation::CreateLink { link, .. } => {
                non_blank("url", &link.url)?;
                self.scope(&link.scope)?;
                self.require_all(EntityKind::Tag, &link.tags)
            }
            Operation::UpdateLink { id, url, .. } => {
                self.require(EntityKind::Link, *id)?;
                non_blank("url", url)?;
                Ok(())
            }
            Operation::MoveLink { id, scope } => {
                self.require(EntityKind::Link, *id)?;
                self.scope(scope)
            }
            Operation::SetLinkTags { id, tags } => {
                self.require(EntityKind::Link, *id)?;
                self.require_all(EntityKind::Tag, tags)
            }
            Operation::ArchiveLink { id }
            | Operation::UnarchiveLink { id }
            | Operation::SetLinkImportance { id, .. }
            | Operation::DeleteLink { id } => self.require(EntityKind::Link, *id).map(drop),

            Operation::CreateTag { name, .. } => {
                non_blank("tag name", name)?;
                self.unique_name(EntityKind::Tag, name, None)
            }
            Operation::RenameTag { id, name } => {
                self.require(EntityKind::Tag, *id)?;
                non_blank("tag name", name)?;
                self.unique_name(EntityKind::Tag, name, Some(*id))
            }
            Operation::DeleteTag { id } => self.require(EntityKind::Tag, *id).map(drop),

            Operation::CreatePanel { name, .. } => {
                non_blank("panel name", name)?;
                not_reserved(name, &RESERVED_PANEL_NAMES)?;
                self.unique_name(EntityKind::Panel, name, None)
            }
            Operation::RenamePanel { id, name } => {
                self.require(EntityKind::Panel, *id)?;
                non_blank("panel name", name)?;
                not_reserved(name, &RESERVED_PANEL_NAMES)?;
                self.unique_name(EntityKind::Panel, name, Some(*id))
            }
            Operation::DeletePanel { id } => self.require(EntityKind::Panel, *id).map(drop),
            Operation::AddPanelFolder { panel, folder, .. } => {
                self.require(EntityKind::Panel, *panel)?;
                self.require(EntityKind::Folder, *folder)?;
                self.not_attached(*panel, *folder)
            }
            Operation::RemovePanelFolder { id } => {
                self.require(EntityKind::PanelFolder, *id).map(drop)
            }

            Operation::ArchiveMany { selection }
            | Operation::UnarchiveMany { selection }
            | Operation::DeleteMany { selection } => self.selection(selection),
            Operation::MoveMany { selection, target } => {
                self.selection(selection)?;
                if let Some(target) = target {
                    self.require(EntityKind::Folder, *target)?;
                }
                let mut moved = HashSet::new();
                for id in &selection.folders {
                    self.no_cycle(*id, *target)?;
                    let folder = self.require(EntityKind::Folder, *id)?;
                    self.unique_folder_name(folder.label(), *target, Some(*id))?;
                    if !moved.insert(normalized(folder.label())) {
                        return Err(ValidationError::DuplicateName {
                            kind: EntityKind::Folder,
                            name: folder.label().trim().to_string(),
                        }
                        .into());
                    }
                }
                Ok(())
            }
        }
    }

    /// Structural checks that still apply to changes made by other clients.
    ///
    /// Names are not checked: the remote authority has already accepted them.
    pub(crate) fn inbound(&self, op: &Operation<LocalRef>) -> SyncResult<()> {
        match op {
            Operation::MoveFolder {
                id: LocalRef::Local(id),
                parent: Some(LocalRef::Local(parent)),
            } => self.no_cycle(*id, Some(*parent)),
            Operation::MoveMany {
                selection,
                target: Some(LocalRef::Local(target)),
            } => {
                for folder in selection.folders.iter().filter_map(|f| f.local()) {
                    self.no_cycle(folder, Some(*target))?;
                }
                Ok(())
            }
            Operation::AddPanelFolder { panel, folder, .. } => {
                // A dangling side resolves once its entity arrives.
                if let LocalRef::Local(panel) = panel {
                    self.require(EntityKind::Panel, *panel)?;
                }
                if let LocalRef::Local(folder) = folder {
                    self.require(EntityKind::Folder, *folder)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::operation::FolderFields;
    use crate::storage::MemoryStore;
    use crate::types::{Folder, Panel, RemoteId, SyncMeta};

    fn store_with_tree() -> (MemoryStore, LocalId, LocalId) {
        let store = MemoryStore::new();
        let folder = |name: &str, parent: Option<LocalId>| {
            Record::Folder(Folder {
                meta: SyncMeta::unsynced(1),
                name: name.into(),
                note: String::new(),
                parent: parent.map(LocalRef::Local),
                archived: false,
            })
        };
        let root = store.insert(folder("Reading", None)).unwrap();
        let child = store.insert(folder("Rust", Some(root))).unwrap();
        (store, root, child)
    }

    fn expect_validation(result: SyncResult<()>) -> ValidationError {
        match result {
            Err(SyncError::Validation(e)) => e,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_and_reserved_names() {
        let (store, _, _) = store_with_tree();
        let v = Validator::new(&store);

        let blank = Operation::CreateFolder {
            id: None,
            folder: FolderFields::named("   "),
        };
        assert_eq!(expect_validation(v.user(&blank)), ValidationError::Blank("folder name"));

        let reserved = Operation::CreateFolder {
            id: None,
            folder: FolderFields::named(" archive "),
        };
        assert!(matches!(
            expect_validation(v.user(&reserved)),
            ValidationError::ReservedName(_)
        ));

        let panel = Operation::CreatePanel {
            id: None,
            name: "default".into(),
        };
        assert!(matches!(
            expect_validation(v.user(&panel)),
            ValidationError::ReservedName(_)
        ));
    }

    #[test]
    fn test_duplicate_sibling_names() {
        let (store, root, child) = store_with_tree();
        let v = Validator::new(&store);

        let dup = Operation::CreateFolder {
            id: None,
            folder: FolderFields::named("rust").under(root),
        };
        assert!(matches!(
            expect_validation(v.user(&dup)),
            ValidationError::DuplicateName { .. }
        ));

        let elsewhere = Operation::CreateFolder {
            id: None,
            folder: FolderFields::named("Rust"),
        };
        assert!(v.user(&elsewhere).is_ok(), "same name at another level is fine");

        let same = Operation::RenameFolder {
            id: child,
            name: "Rust".into(),
        };
        assert!(v.user(&same).is_ok(), "renaming to own name is not a clash");
    }

    #[test]
    fn test_cycles_rejected() {
        let (store, root, child) = store_with_tree();
        let v = Validator::new(&store);

        let op = Operation::MoveFolder {
            id: root,
            parent: Some(child),
        };
        assert_eq!(
            expect_validation(v.user(&op)),
            ValidationError::Cycle {
                folder: root,
                parent: child
            }
        );

        let onto_self = Operation::MoveFolder {
            id: root,
            parent: Some(root),
        };
        assert!(v.user(&onto_self).is_err());

        let inbound = Operation::MoveFolder {
            id: LocalRef::Local(root),
            parent: Some(LocalRef::Local(child)),
        };
        assert!(v.inbound(&inbound).is_err());
    }

    #[test]
    fn test_missing_references() {
        let (store, _, _) = store_with_tree();
        let v = Validator::new(&store);
        let op = Operation::ArchiveLink { id: LocalId(77) };
        assert_eq!(
            expect_validation(v.user(&op)),
            ValidationError::MissingReference {
                kind: EntityKind::Link,
                id: LocalId(77)
            }
        );
        assert_eq!(
            expect_validation(v.user(&Operation::DeleteMany {
                selection: Selection::new(vec![], vec![])
            })),
            ValidationError::EmptySelection
        );
    }

    #[test]
    fn test_panel_attachment_checks() {
        let (store, root, _) = store_with_tree();
        let panel = store
            .insert(Record::Panel(Panel {
                meta: SyncMeta::unsynced(1),
                name: "Work".into(),
            }))
            .unwrap();
        let v = Validator::new(&store);

        let attach = Operation::AddPanelFolder {
            id: None,
            panel,
            folder: root,
            position: 0,
        };
        assert!(v.user(&attach).is_ok());

        let dangling = Operation::AddPanelFolder {
            id: None,
            panel: LocalRef::Dangling(RemoteId(901)),
            folder: LocalRef::Dangling(RemoteId(900)),
            position: 0,
        };
        assert!(v.inbound(&dangling).is_ok(), "attachments may precede their panel");

        let gone = Operation::AddPanelFolder {
            id: None,
            panel: LocalRef::Local(panel),
            folder: LocalRef::Local(LocalId(404)),
            position: 0,
        };
        assert!(matches!(
            expect_validation(v.inbound(&gone)),
            ValidationError::MissingReference { .. }
        ));
    }

    #[test]
    fn test_bulk_move_keeps_sibling_names_unique() {
        let (store, root, child) = store_with_tree();
        let other = store
            .insert(Record::Folder(Folder {
                meta: SyncMeta::unsynced(1),
                name: "Elsewhere".into(),
                note: String::new(),
                parent: None,
                archived: false,
            }))
            .unwrap();
        let rust_elsewhere = store
            .insert(Record::Folder(Folder {
                meta: SyncMeta::unsynced(1),
                name: "Rust".into(),
                note: String::new(),
                parent: Some(LocalRef::Local(other)),
                archived: false,
            }))
            .unwrap();
        let v = Validator::new(&store);

        let single = Operation::MoveFolder {
            id: rust_elsewhere,
            parent: Some(root),
        };
        assert!(v.user(&single).is_err());

        let bulk = Operation::MoveMany {
            selection: Selection::folders(vec![rust_elsewhere]),
            target: Some(root),
        };
        assert!(matches!(
            expect_validation(v.user(&bulk)),
            ValidationError::DuplicateName { .. }
        ));

        let clashing_pair = Operation::MoveMany {
            selection: Selection::folders(vec![child, rust_elsewhere]),
            target: None,
        };
        assert!(matches!(
            expect_validation(v.user(&clashing_pair)),
            ValidationError::DuplicateName { .. }
        ));

        let distinct = Operation::MoveMany {
            selection: Selection::folders(vec![rust_elsewhere]),
            target: None,
        };
        assert!(v.user(&distinct).is_ok());
    }
}
