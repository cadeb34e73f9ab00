//! Core types for Linksync
//!
//! Identifiers live in two disjoint spaces: [`LocalId`] is assigned by this
//! client's record store, [`RemoteId`] by the remote authority once an entity
//! has been mirrored. They are distinct types so the compiler refuses to mix
//! them; crossing the boundary always goes through the id translator.

use serde::{Deserialize, Serialize};

pub mod records;

pub use records::{Folder, Link, Panel, PanelFolder, Record, SyncMeta, Tag};

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock time as a [`Timestamp`].
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// Identifier assigned by the local record store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub i64);

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the remote authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub i64);

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// The five synchronized entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Folder,
    Link,
    Tag,
    Panel,
    PanelFolder,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Folder,
        EntityKind::Link,
        EntityKind::Tag,
        EntityKind::Panel,
        EntityKind::PanelFolder,
    ];

    /// Order in which unsynced creations must reach the remote so that
    /// references always point at something already mirrored.
    pub const DEPENDENCY_ORDER: [EntityKind; 5] = [
        EntityKind::Tag,
        EntityKind::Folder,
        EntityKind::Panel,
        EntityKind::Link,
        EntityKind::PanelFolder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Folder => "folder",
            EntityKind::Link => "link",
            EntityKind::Tag => "tag",
            EntityKind::Panel => "panel",
            EntityKind::PanelFolder => "panel-folder",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference held by a local record.
///
/// Inbound events may reference entities this client has not received yet.
/// Such references are kept as `Dangling` and rewritten to `Local` as soon as
/// the target is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalRef {
    Local(LocalId),
    Dangling(RemoteId),
}

impl LocalRef {
    pub fn local(&self) -> Option<LocalId> {
        match self {
            LocalRef::Local(id) => Some(*id),
            LocalRef::Dangling(_) => None,
        }
    }

    pub fn is_dangling(&self) -> bool {
        matches!(self, LocalRef::Dangling(_))
    }
}

impl std::fmt::Display for LocalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalRef::Local(id) => write!(f, "{}", id),
            LocalRef::Dangling(remote) => write!(f, "{} (not received yet)", remote),
        }
    }
}

impl From<LocalId> for LocalRef {
    fn from(id: LocalId) -> Self {
        LocalRef::Local(id)
    }
}

/// Where a link lives.
///
/// `Saved` and `History` are default scopes known to every client; they are
/// never synchronized as entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkScope<F> {
    Saved,
    History,
    Folder(F),
}

impl<F> LinkScope<F> {
    pub fn folder(&self) -> Option<&F> {
        match self {
            LinkScope::Folder(f) => Some(f),
            _ => None,
        }
    }

    pub fn try_map<T, E>(self, f: impl FnOnce(F) -> Result<T, E>) -> Result<LinkScope<T>, E> {
        Ok(match self {
            LinkScope::Saved => LinkScope::Saved,
            LinkScope::History => LinkScope::History,
            LinkScope::Folder(id) => LinkScope::Folder(f(id)?),
        })
    }
}

impl<F> Default for LinkScope<F> {
    fn default() -> Self {
        LinkScope::Saved
    }
}

/// Folder names that shadow a default scope.
pub const RESERVED_FOLDER_NAMES: [&str; 4] =
    ["Saved Links", "Important Links", "Archive", "History"];

/// Panel name used by the built-in panel.
pub const RESERVED_PANEL_NAMES: [&str; 1] = ["Default"];
