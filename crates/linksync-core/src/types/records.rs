//! Synchronized entity records
//!
//! Every record embeds a [`SyncMeta`] carrying its local id, its remote id
//! once mirrored, and the timestamps used for informational ordering and
//! stale-event detection.

use serde::{Deserialize, Serialize};

use super::{EntityKind, LinkScope, LocalId, LocalRef, RemoteId, Timestamp};

/// Synchronization metadata shared by every entity kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Assigned by the record store on insert
    pub local_id: LocalId,
    /// Absent until the create has been mirrored; never changes afterwards
    pub remote_id: Option<RemoteId>,
    /// Time of the most recent write, local or remote
    pub last_modified: Timestamp,
    /// Most recent remote-confirmed event timestamp for this entity
    pub synced_at: Option<Timestamp>,
}

impl SyncMeta {
    /// Metadata for a record about to be inserted locally.
    pub fn unsynced(at: Timestamp) -> Self {
        Self {
            local_id: LocalId(0),
            remote_id: None,
            last_modified: at,
            synced_at: None,
        }
    }

    /// Metadata for a record materialized from a remote event.
    pub fn mirrored(remote_id: RemoteId, at: Timestamp) -> Self {
        Self {
            local_id: LocalId(0),
            remote_id: Some(remote_id),
            last_modified: at,
            synced_at: Some(at),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.remote_id.is_some()
    }

    /// An inbound event older than what the remote already confirmed for
    /// this entity must not overwrite it.
    pub fn is_stale(&self, event_timestamp: Timestamp) -> bool {
        self.synced_at.is_some_and(|confirmed| event_timestamp < confirmed)
    }

    /// Record a local write.
    pub fn touch(&mut self, at: Timestamp) {
        self.last_modified = at;
    }

    /// Record a write confirmed by the remote authority.
    pub fn confirm(&mut self, event_timestamp: Timestamp) {
        self.last_modified = event_timestamp;
        self.synced_at = Some(self.synced_at.map_or(event_timestamp, |s| s.max(event_timestamp)));
    }
}

/// A folder; `parent == None` places it at the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub meta: SyncMeta,
    pub name: String,
    pub note: String,
    pub parent: Option<LocalRef>,
    pub archived: bool,
}

/// A saved link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub meta: SyncMeta,
    pub title: String,
    pub url: String,
    pub note: String,
    pub scope: LinkScope<LocalRef>,
    pub important: bool,
    pub archived: bool,
    pub tags: Vec<LocalRef>,
}

impl Link {
    pub fn has_tag(&self, tag: LocalId) -> bool {
        self.tags.contains(&LocalRef::Local(tag))
    }
}

/// A tag that can be attached to links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub meta: SyncMeta,
    pub name: String,
}

/// A panel groups folders for quick access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Panel {
    pub meta: SyncMeta,
    pub name: String,
}

/// Attachment of a folder to a panel
///
/// Either side may still be dangling when the attachment arrived from the
/// remote before the panel or folder it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelFolder {
    pub meta: SyncMeta,
    pub panel: LocalRef,
    pub folder: LocalRef,
    pub position: i64,
}

impl PanelFolder {
    pub fn is_on(&self, panel: LocalId) -> bool {
        self.panel == LocalRef::Local(panel)
    }

    pub fn pins(&self, folder: LocalId) -> bool {
        self.folder == LocalRef::Local(folder)
    }
}

/// Any synchronized record, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Folder(Folder),
    Link(Link),
    Tag(Tag),
    Panel(Panel),
    PanelFolder(PanelFolder),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Folder(_) => EntityKind::Folder,
            Record::Link(_) => EntityKind::Link,
            Record::Tag(_) => EntityKind::Tag,
            Record::Panel(_) => EntityKind::Panel,
            Record::PanelFolder(_) => EntityKind::PanelFolder,
        }
    }

    pub fn meta(&self) -> &SyncMeta {
        match self {
            Record::Folder(r) => &r.meta,
            Record::Link(r) => &r.meta,
            Record::Tag(r) => &r.meta,
            Record::Panel(r) => &r.meta,
            Record::PanelFolder(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut SyncMeta {
        match self {
            Record::Folder(r) => &mut r.meta,
            Record::Link(r) => &mut r.meta,
            Record::Tag(r) => &mut r.meta,
            Record::Panel(r) => &mut r.meta,
            Record::PanelFolder(r) => &mut r.meta,
        }
    }

    pub fn local_id(&self) -> LocalId {
        self.meta().local_id
    }

    pub fn remote_id(&self) -> Option<RemoteId> {
        self.meta().remote_id
    }

    /// Display label used by listings and logs.
    pub fn label(&self) -> &str {
        match self {
            Record::Folder(r) => &r.name,
            Record::Link(r) => &r.title,
            Record::Tag(r) => &r.name,
            Record::Panel(r) => &r.name,
            Record::PanelFolder(_) => "",
        }
    }

    pub fn into_folder(self) -> Option<Folder> {
        match self {
            Record::Folder(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_link(self) -> Option<Link> {
        match self {
            Record::Link(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_tag(self) -> Option<Tag> {
        match self {
            Record::Tag(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_panel(self) -> Option<Panel> {
        match self {
            Record::Panel(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_panel_folder(self) -> Option<PanelFolder> {
        match self {
            Record::PanelFolder(r) => Some(r),
            _ => None,
        }
    }
}
