//! Mirrorable operations
//!
//! [`Operation`] is the closed set of mutations that cross the local/remote
//! boundary. It is generic over the identifier space it carries:
//!
//! ```text
//! Operation<LocalId>   queue payloads, user mutations
//! Operation<RemoteId>  outbound requests, inbound change events
//! Operation<LocalRef>  the local-apply path for inbound events
//! ```
//!
//! Moving between spaces is done with [`Operation::try_map_ids`], which visits
//! every embedded id together with the entity kind it refers to. Adding a
//! variant is a compile error everywhere the operation is matched.

use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::types::{EntityKind, LinkScope, LocalId, Record};

/// Field group written by a folder creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderFields<Id> {
    pub name: String,
    pub note: String,
    pub parent: Option<Id>,
    pub archived: bool,
}

impl<Id> FolderFields<Id> {
    /// A root-level, non-archived folder with an empty note.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            note: String::new(),
            parent: None,
            archived: false,
        }
    }

    pub fn under(mut self, parent: Id) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    fn try_map<T, E>(
        self,
        f: &mut impl FnMut(EntityKind, Id) -> Result<T, E>,
    ) -> Result<FolderFields<T>, E> {
        Ok(FolderFields {
            name: self.name,
            note: self.note,
            parent: self.parent.map(|p| f(EntityKind::Folder, p)).transpose()?,
            archived: self.archived,
        })
    }
}

/// Field group written by a link creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFields<Id> {
    pub title: String,
    pub url: String,
    pub note: String,
    pub scope: LinkScope<Id>,
    pub important: bool,
    pub archived: bool,
    pub tags: Vec<Id>,
}

impl<Id> LinkFields<Id> {
    /// A link in the saved-links scope.
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            note: String::new(),
            scope: LinkScope::Saved,
            important: false,
            archived: false,
            tags: Vec::new(),
        }
    }

    pub fn in_scope(mut self, scope: LinkScope<Id>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<Id>) -> Self {
        self.tags = tags;
        self
    }

    pub fn important(mut self) -> Self {
        self.important = true;
        self
    }

    fn try_map<T, E>(
        self,
        f: &mut impl FnMut(EntityKind, Id) -> Result<T, E>,
    ) -> Result<LinkFields<T>, E> {
        Ok(LinkFields {
            title: self.title,
            url: self.url,
            note: self.note,
            scope: self.scope.try_map(|id| f(EntityKind::Folder, id))?,
            important: self.important,
            archived: self.archived,
            tags: map_all(self.tags, EntityKind::Tag, f)?,
        })
    }
}

/// A multi-item selection used by bulk operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection<Id> {
    pub folders: Vec<Id>,
    pub links: Vec<Id>,
}

impl<Id> Selection<Id> {
    pub fn new(folders: Vec<Id>, links: Vec<Id>) -> Self {
        Self { folders, links }
    }

    pub fn folders(folders: Vec<Id>) -> Self {
        Self::new(folders, Vec::new())
    }

    pub fn links(links: Vec<Id>) -> Self {
        Self::new(Vec::new(), links)
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.links.is_empty()
    }

    fn try_map<T, E>(
        self,
        f: &mut impl FnMut(EntityKind, Id) -> Result<T, E>,
    ) -> Result<Selection<T>, E> {
        Ok(Selection {
            folders: map_all(self.folders, EntityKind::Folder, f)?,
            links: map_all(self.links, EntityKind::Link, f)?,
        })
    }
}

impl<Id: Copy> Selection<Id> {
    fn members(&self) -> Vec<(EntityKind, Id)> {
        self.folders
            .iter()
            .map(|id| (EntityKind::Folder, *id))
            .chain(self.links.iter().map(|id| (EntityKind::Link, *id)))
            .collect()
    }
}

fn map_all<Id, T, E>(
    ids: Vec<Id>,
    kind: EntityKind,
    f: &mut impl FnMut(EntityKind, Id) -> Result<T, E>,
) -> Result<Vec<T>, E> {
    ids.into_iter().map(|id| f(kind, id)).collect()
}

/// Every mutation that can be mirrored to the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation<Id> {
    CreateFolder { id: Option<Id>, folder: FolderFields<Id> },
    RenameFolder { id: Id, name: String },
    UpdateFolderNote { id: Id, note: String },
    MoveFolder { id: Id, parent: Option<Id> },
    ArchiveFolder { id: Id },
    UnarchiveFolder { id: Id },
    DeleteFolder { id: Id },

    CreateLink { id: Option<Id>, link: LinkFields<Id> },
    UpdateLink { id: Id, title: String, url: String, note: String },
    MoveLink { id: Id, scope: LinkScope<Id> },
    ArchiveLink { id: Id },
    UnarchiveLink { id: Id },
    SetLinkImportance { id: Id, important: bool },
    SetLinkTags { id: Id, tags: Vec<Id> },
    DeleteLink { id: Id },

    CreateTag { id: Option<Id>, name: String },
    RenameTag { id: Id, name: String },
    DeleteTag { id: Id },

    CreatePanel { id: Option<Id>, name: String },
    RenamePanel { id: Id, name: String },
    DeletePanel { id: Id },
    AddPanelFolder { id: Option<Id>, panel: Id, folder: Id, position: i64 },
    RemovePanelFolder { id: Id },

    ArchiveMany { selection: Selection<Id> },
    UnarchiveMany { selection: Selection<Id> },
    DeleteMany { selection: Selection<Id> },
    MoveMany { selection: Selection<Id>, target: Option<Id> },
}

/// Whether an operation creates, updates or deletes its subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Create,
    Update,
    Delete,
}

/// Discriminant of [`Operation`], stored next to each queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    CreateFolder,
    RenameFolder,
    UpdateFolderNote,
    MoveFolder,
    ArchiveFolder,
    UnarchiveFolder,
    DeleteFolder,
    CreateLink,
    UpdateLink,
    MoveLink,
    ArchiveLink,
    UnarchiveLink,
    SetLinkImportance,
    SetLinkTags,
    DeleteLink,
    CreateTag,
    RenameTag,
    DeleteTag,
    CreatePanel,
    RenamePanel,
    DeletePanel,
    AddPanelFolder,
    RemovePanelFolder,
    ArchiveMany,
    UnarchiveMany,
    DeleteMany,
    MoveMany,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateFolder => "create_folder",
            OperationKind::RenameFolder => "rename_folder",
            OperationKind::UpdateFolderNote => "update_folder_note",
            OperationKind::MoveFolder => "move_folder",
            OperationKind::ArchiveFolder => "archive_folder",
            OperationKind::UnarchiveFolder => "unarchive_folder",
            OperationKind::DeleteFolder => "delete_folder",
            OperationKind::CreateLink => "create_link",
            OperationKind::UpdateLink => "update_link",
            OperationKind::MoveLink => "move_link",
            OperationKind::ArchiveLink => "archive_link",
            OperationKind::UnarchiveLink => "unarchive_link",
            OperationKind::SetLinkImportance => "set_link_importance",
            OperationKind::SetLinkTags => "set_link_tags",
            OperationKind::DeleteLink => "delete_link",
            OperationKind::CreateTag => "create_tag",
            OperationKind::RenameTag => "rename_tag",
            OperationKind::DeleteTag => "delete_tag",
            OperationKind::CreatePanel => "create_panel",
            OperationKind::RenamePanel => "rename_panel",
            OperationKind::DeletePanel => "delete_panel",
            OperationKind::AddPanelFolder => "add_panel_folder",
            OperationKind::RemovePanelFolder => "remove_panel_folder",
            OperationKind::ArchiveMany => "archive_many",
            OperationKind::UnarchiveMany => "unarchive_many",
            OperationKind::DeleteMany => "delete_many",
            OperationKind::MoveMany => "move_many",
        }
    }

    pub fn class(&self) -> EventClass {
        match self {
            OperationKind::CreateFolder
            | OperationKind::CreateLink
            | OperationKind::CreateTag
            | OperationKind::CreatePanel
            | OperationKind::AddPanelFolder => EventClass::Create,
            OperationKind::DeleteFolder
            | OperationKind::DeleteLink
            | OperationKind::DeleteTag
            | OperationKind::DeletePanel
            | OperationKind::RemovePanelFolder
            | OperationKind::DeleteMany => EventClass::Delete,
            _ => EventClass::Update,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<Id> Operation<Id> {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateFolder { .. } => OperationKind::CreateFolder,
            Operation::RenameFolder { .. } => OperationKind::RenameFolder,
            Operation::UpdateFolderNote { .. } => OperationKind::UpdateFolderNote,
            Operation::MoveFolder { .. } => OperationKind::MoveFolder,
            Operation::ArchiveFolder { .. } => OperationKind::ArchiveFolder,
            Operation::UnarchiveFolder { .. } => OperationKind::UnarchiveFolder,
            Operation::DeleteFolder { .. } => OperationKind::DeleteFolder,
            Operation::CreateLink { .. } => OperationKind::CreateLink,
            Operation::UpdateLink { .. } => OperationKind::UpdateLink,
            Operation::MoveLink { .. } => OperationKind::MoveLink,
            Operation::ArchiveLink { .. } => OperationKind::ArchiveLink,
            Operation::UnarchiveLink { .. } => OperationKind::UnarchiveLink,
            Operation::SetLinkImportance { .. } => OperationKind::SetLinkImportance,
            Operation::SetLinkTags { .. } => OperationKind::SetLinkTags,
            Operation::DeleteLink { .. } => OperationKind::DeleteLink,
            Operation::CreateTag { .. } => OperationKind::CreateTag,
            Operation::RenameTag { .. } => OperationKind::RenameTag,
            Operation::DeleteTag { .. } => OperationKind::DeleteTag,
            Operation::CreatePanel { .. } => OperationKind::CreatePanel,
            Operation::RenamePanel { .. } => OperationKind::RenamePanel,
            Operation::DeletePanel { .. } => OperationKind::DeletePanel,
            Operation::AddPanelFolder { .. } => OperationKind::AddPanelFolder,
            Operation::RemovePanelFolder { .. } => OperationKind::RemovePanelFolder,
            Operation::ArchiveMany { .. } => OperationKind::ArchiveMany,
            Operation::UnarchiveMany { .. } => OperationKind::UnarchiveMany,
            Operation::DeleteMany { .. } => OperationKind::DeleteMany,
            Operation::MoveMany { .. } => OperationKind::MoveMany,
        }
    }

    pub fn class(&self) -> EventClass {
        self.kind().class()
    }

    /// Build the deletion operation for a single entity.
    pub fn delete(kind: EntityKind, id: Id) -> Self {
        match kind {
            EntityKind::Folder => Operation::DeleteFolder { id },
            EntityKind::Link => Operation::DeleteLink { id },
            EntityKind::Tag => Operation::DeleteTag { id },
            EntityKind::Panel => Operation::DeletePanel { id },
            EntityKind::PanelFolder => Operation::RemovePanelFolder { id },
        }
    }

    /// Kind of entity a creation produces.
    pub fn created_kind(&self) -> Option<EntityKind> {
        match self {
            Operation::CreateFolder { .. } => Some(EntityKind::Folder),
            Operation::CreateLink { .. } => Some(EntityKind::Link),
            Operation::CreateTag { .. } => Some(EntityKind::Tag),
            Operation::CreatePanel { .. } => Some(EntityKind::Panel),
            Operation::AddPanelFolder { .. } => Some(EntityKind::PanelFolder),
            _ => None,
        }
    }

    /// Set the id of the entity a creation produces. No-op for other operations.
    pub fn with_subject(mut self, subject: Id) -> Self {
        match &mut self {
            Operation::CreateFolder { id, .. }
            | Operation::CreateLink { id, .. }
            | Operation::CreateTag { id, .. }
            | Operation::CreatePanel { id, .. }
            | Operation::AddPanelFolder { id, .. } => *id = Some(subject),
            _ => {}
        }
        self
    }

    /// Strip the id a creation carries; requests never name the new entity.
    pub fn without_subject(mut self) -> Self {
        match &mut self {
            Operation::CreateFolder { id, .. }
            | Operation::CreateLink { id, .. }
            | Operation::CreateTag { id, .. }
            | Operation::CreatePanel { id, .. }
            | Operation::AddPanelFolder { id, .. } => *id = None,
            _ => {}
        }
        self
    }

    /// Rewrite every embedded id, in order, with the kind it refers to.
    pub fn try_map_ids<T, E>(
        self,
        mut f: impl FnMut(EntityKind, Id) -> Result<T, E>,
    ) -> Result<Operation<T>, E> {
        use EntityKind::{Folder, Link, Panel, PanelFolder, Tag};

        let f = &mut f;
        Ok(match self {
            Operation::CreateFolder { id, folder } => Operation::CreateFolder {
                id: id.map(|id| f(Folder, id)).transpose()?,
                folder: folder.try_map(f)?,
            },
            Operation::RenameFolder { id, name } => Operation::RenameFolder {
                id: f(Folder, id)?,
                name,
            },
            Operation::UpdateFolderNote { id, note } => Operation::UpdateFolderNote {
                id: f(Folder, id)?,
                note,
            },
            Operation::MoveFolder { id, parent } => Operation::MoveFolder {
                id: f(Folder, id)?,
                parent: parent.map(|p| f(Folder, p)).transpose()?,
            },
            Operation::ArchiveFolder { id } => Operation::ArchiveFolder { id: f(Folder, id)? },
            Operation::UnarchiveFolder { id } => Operation::UnarchiveFolder { id: f(Folder, id)? },
            Operation::DeleteFolder { id } => Operation::DeleteFolder { id: f(Folder, id)? },

            Operation::CreateLink { id, link } => Operation::CreateLink {
                id: id.map(|id| f(Link, id)).transpose()?,
                link: link.try_map(f)?,
            },
            Operation::UpdateLink {
                id,
                title,
                url,
                note,
            } => Operation::UpdateLink {
                id: f(Link, id)?,
                title,
                url,
                note,
            },
            Operation::MoveLink { id, scope } => Operation::MoveLink {
                id: f(Link, id)?,
                scope: scope.try_map(|folder| f(Folder, folder))?,
            },
            Operation::ArchiveLink { id } => Operation::ArchiveLink { id: f(Link, id)? },
            Operation::UnarchiveLink { id } => Operation::UnarchiveLink { id: f(Link, id)? },
            Operation::SetLinkImportance { id, important } => Operation::SetLinkImportance {
                id: f(Link, id)?,
                important,
            },
            Operation::SetLinkTags { id, tags } => Operation::SetLinkTags {
                id: f(Link, id)?,
                tags: map_all(tags, Tag, f)?,
            },
            Operation::DeleteLink { id } => Operation::DeleteLink { id: f(Link, id)? },

            Operation::CreateTag { id, name } => Operation::CreateTag {
                id: id.map(|id| f(Tag, id)).transpose()?,
                name,
            },
            Operation::RenameTag { id, name } => Operation::RenameTag {
                id: f(Tag, id)?,
                name,
            },
            Operation::DeleteTag { id } => Operation::DeleteTag { id: f(Tag, id)? },

            Operation::CreatePanel { id, name } => Operation::CreatePanel {
                id: id.map(|id| f(Panel, id)).transpose()?,
                name,
            },
            Operation::RenamePanel { id, name } => Operation::RenamePanel {
                id: f(Panel, id)?,
                name,
            },
            Operation::DeletePanel { id } => Operation::DeletePanel { id: f(Panel, id)? },
            Operation::AddPanelFolder {
                id,
                panel,
                folder,
                position,
            } => Operation::AddPanelFolder {
                id: id.map(|id| f(PanelFolder, id)).transpose()?,
                panel: f(Panel, panel)?,
                folder: f(Folder, folder)?,
                position,
            },
            Operation::RemovePanelFolder { id } => Operation::RemovePanelFolder {
                id: f(PanelFolder, id)?,
            },

            Operation::ArchiveMany { selection } => Operation::ArchiveMany {
                selection: selection.try_map(f)?,
            },
            Operation::UnarchiveMany { selection } => Operation::UnarchiveMany {
                selection: selection.try_map(f)?,
            },
            Operation::DeleteMany { selection } => Operation::DeleteMany {
                selection: selection.try_map(f)?,
            },
            Operation::MoveMany { selection, target } => Operation::MoveMany {
                selection: selection.try_map(f)?,
                target: target.map(|t| f(Folder, t)).transpose()?,
            },
        })
    }

    /// Infallible variant of [`Operation::try_map_ids`].
    pub fn map_ids<T>(self, mut f: impl FnMut(EntityKind, Id) -> T) -> Operation<T> {
        match self.try_map_ids(|kind, id| Ok::<T, Infallible>(f(kind, id))) {
            Ok(op) => op,
            Err(never) => match never {},
        }
    }
}

impl<Id: Copy> Operation<Id> {
    /// The created entity's id, when the operation is a creation carrying one.
    pub fn subject(&self) -> Option<(EntityKind, Id)> {
        match self {
            Operation::CreateFolder { id, .. }
            | Operation::CreateLink { id, .. }
            | Operation::CreateTag { id, .. }
            | Operation::CreatePanel { id, .. }
            | Operation::AddPanelFolder { id, .. } => {
                let kind = self.created_kind()?;
                id.map(|id| (kind, id))
            }
            _ => self.targets().into_iter().next(),
        }
    }

    /// Entities whose state the operation writes.
    pub fn targets(&self) -> Vec<(EntityKind, Id)> {
        match self {
            Operation::CreateFolder { .. }
            | Operation::CreateLink { .. }
            | Operation::CreateTag { .. }
            | Operation::CreatePanel { .. }
            | Operation::AddPanelFolder { .. } => self
                .created_kind()
                .and_then(|kind| match self {
                    Operation::CreateFolder { id, .. }
                    | Operation::CreateLink { id, .. }
                    | Operation::CreateTag { id, .. }
                    | Operation::CreatePanel { id, .. }
                    | Operation::AddPanelFolder { id, .. } => id.map(|id| (kind, id)),
                    _ => None,
                })
                .into_iter()
                .collect(),
            Operation::RenameFolder { id, .. }
            | Operation::UpdateFolderNote { id, .. }
            | Operation::MoveFolder { id, .. }
            | Operation::ArchiveFolder { id }
            | Operation::UnarchiveFolder { id }
            | Operation::DeleteFolder { id } => vec![(EntityKind::Folder, *id)],
            Operation::UpdateLink { id, .. }
            | Operation::MoveLink { id, .. }
            | Operation::ArchiveLink { id }
            | Operation::UnarchiveLink { id }
            | Operation::SetLinkImportance { id, .. }
            | Operation::SetLinkTags { id, .. }
            | Operation::DeleteLink { id } => vec![(EntityKind::Link, *id)],
            Operation::RenameTag { id, .. } | Operation::DeleteTag { id } => {
                vec![(EntityKind::Tag, *id)]
            }
            Operation::RenamePanel { id, .. } | Operation::DeletePanel { id } => {
                vec![(EntityKind::Panel, *id)]
            }
            Operation::RemovePanelFolder { id } => vec![(EntityKind::PanelFolder, *id)],
            Operation::ArchiveMany { selection }
            | Operation::UnarchiveMany { selection }
            | Operation::DeleteMany { selection }
            | Operation::MoveMany { selection, .. } => selection.members(),
        }
    }
}

impl Operation<LocalId> {
    /// Rebuild the creation of an existing local record.
    ///
    /// Returns `None` when the record still holds dangling references, which
    /// only happens for records that came from the remote in the first place.
    pub fn recreate(record: &Record) -> Option<Self> {
        let id = Some(record.local_id());
        Some(match record {
            Record::Folder(folder) => Operation::CreateFolder {
                id,
                folder: FolderFields {
                    name: folder.name.clone(),
                    note: folder.note.clone(),
                    parent: match folder.parent {
                        Some(parent) => Some(parent.local()?),
                        None => None,
                    },
                    archived: folder.archived,
                },
            },
            Record::Link(link) => Operation::CreateLink {
                id,
                link: LinkFields {
                    title: link.title.clone(),
                    url: link.url.clone(),
                    note: link.note.clone(),
                    scope: link.scope.try_map(|r| r.local().ok_or(())).ok()?,
                    important: link.important,
                    archived: link.archived,
                    tags: link
                        .tags
                        .iter()
                        .map(|t| t.local())
                        .collect::<Option<Vec<_>>>()?,
                },
            },
            Record::Tag(tag) => Operation::CreateTag {
                id,
                name: tag.name.clone(),
            },
            Record::Panel(panel) => Operation::CreatePanel {
                id,
                name: panel.name.clone(),
            },
            Record::PanelFolder(pf) => Operation::AddPanelFolder {
                id,
                panel: pf.panel.local()?,
                folder: pf.folder.local()?,
                position: pf.position,
            },
        })
    }
}
