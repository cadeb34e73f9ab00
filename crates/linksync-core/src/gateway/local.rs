//! Entity-level local writes.
//!
//! Both user mutations and inbound change events end up here, so store
//! invariants (cascades, reference rewrites, metadata stamping) hold the same
//! way for either origin.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::operation::{EventClass, Operation};
use crate::storage::RecordStore;
use crate::types::{
    EntityKind, Folder, Link, LinkScope, LocalId, LocalRef, Panel, PanelFolder, Record, RemoteId,
    SyncMeta, Tag, Timestamp,
};

use super::tree;

/// Who is writing, and when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    User { at: Timestamp },
    Remote { event_timestamp: Timestamp },
}

/// What a local write did to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEffect {
    Created(LocalId),
    Updated(Vec<(EntityKind, LocalId)>),
    /// Every removed entity, cascades included
    Deleted(Vec<(EntityKind, LocalId)>),
    /// The target is not present locally
    NotFound,
    /// Inbound update older than the state already confirmed locally
    Stale,
}

impl LocalEffect {
    pub fn created(&self) -> Option<LocalId> {
        match self {
            LocalEffect::Created(id) => Some(*id),
            _ => None,
        }
    }

    pub fn removed(&self) -> &[(EntityKind, LocalId)] {
        match self {
            LocalEffect::Deleted(removed) => removed,
            _ => &[],
        }
    }

    /// Whether the store was modified.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            LocalEffect::Created(_) | LocalEffect::Updated(_) | LocalEffect::Deleted(_)
        )
    }
}

/// Materialize the record described by a creation.
fn build(op: &Operation<LocalRef>, meta: SyncMeta) -> Option<Record> {
    Some(match op {
        Operation::CreateFolder { folder, .. } => Record::Folder(Folder {
            meta,
            name: folder.name.clone(),
            note: folder.note.clone(),
            parent: folder.parent,
            archived: folder.archived,
        }),
        Operation::CreateLink { link, .. } => Record::Link(Link {
            meta,
            title: link.title.clone(),
            url: link.url.clone(),
            note: link.note.clone(),
            scope: link.scope,
            important: link.important,
            archived: link.archived,
            tags: link.tags.clone(),
        }),
        Operation::CreateTag { name, .. } => Record::Tag(Tag {
            meta,
            name: name.clone(),
        }),
        Operation::CreatePanel { name, .. } => Record::Panel(Panel {
            meta,
            name: name.clone(),
        }),
        Operation::AddPanelFolder {
            panel,
            folder,
            position,
            ..
        } => Record::PanelFolder(PanelFolder {
            meta,
            panel: *panel,
            folder: *folder,
            position: *position,
        }),
        _ => return None,
    })
}

/// Apply a non-creating, non-deleting operation to one record.
fn mutate(record: &mut Record, op: &Operation<LocalRef>) {
    match (op, record) {
        (Operation::RenameFolder { name, .. }, Record::Folder(f)) => f.name = name.clone(),
        (Operation::UpdateFolderNote { note, .. }, Record::Folder(f)) => f.note = note.clone(),
        (Operation::MoveFolder { parent, .. }, Record::Folder(f)) => f.parent = *parent,
        (Operation::ArchiveFolder { .. }, Record::Folder(f))
        | (Operation::ArchiveMany { .. }, Record::Folder(f)) => f.archived = true,
        (Operation::UnarchiveFolder { .. }, Record::Folder(f))
        | (Operation::UnarchiveMany { .. }, Record::Folder(f)) => f.archived = false,
        (Operation::MoveMany { target, .. }, Record::Folder(f)) => f.parent = *target,

        (
            Operation::UpdateLink {
                title, url, note, ..
            },
            Record::Link(l),
        ) => {
            l.title = title.clone();
            l.url = url.clone();
            l.note = note.clone();
        }
        (Operation::MoveLink { scope, .. }, Record::Link(l)) => l.scope = *scope,
        (Operation::ArchiveLink { .. }, Record::Link(l))
        | (Operation::ArchiveMany { .. }, Record::Link(l)) => l.archived = true,
        (Operation::UnarchiveLink { .. }, Record::Link(l))
        | (Operation::UnarchiveMany { .. }, Record::Link(l)) => l.archived = false,
        (Operation::SetLinkImportance { important, .. }, Record::Link(l)) => {
            l.important = *important
        }
        (Operation::SetLinkTags { tags, .. }, Record::Link(l)) => l.tags = tags.clone(),
        (Operation::MoveMany { target, .. }, Record::Link(l)) => {
            l.scope = match target {
                Some(folder) => LinkScope::Folder(*folder),
                None => LinkScope::Saved,
            }
        }

        (Operation::RenameTag { name, .. }, Record::Tag(t)) => t.name = name.clone(),
        (Operation::RenamePanel { name, .. }, Record::Panel(p)) => p.name = name.clone(),
        (op, record) => warn!(
            op = %op.kind(),
            kind = %record.kind(),
            "Operation does not apply to record"
        ),
    }
}

fn stamp(meta: &mut SyncMeta, source: Source) {
    match source {
        Source::User { at } => meta.touch(at),
        Source::Remote { event_timestamp } => meta.confirm(event_timestamp),
    }
}

/// Applies operations to the record store
#[derive(Clone)]
pub(crate) struct LocalApplier {
    store: Arc<dyn RecordStore>,
}

impl LocalApplier {
    pub(crate) fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub(crate) fn apply(
        &self,
        op: &Operation<LocalRef>,
        source: Source,
    ) -> SyncResult<LocalEffect> {
        match op.class() {
            EventClass::Create => self.create(op, source),
            EventClass::Update => self.update(op, source),
            EventClass::Delete => self.delete(op, source),
        }
    }

    fn create(&self, op: &Operation<LocalRef>, source: Source) -> SyncResult<LocalEffect> {
        match (op.subject(), source) {
            (None, Source::User { at }) => {
                let Some(record) = build(op, SyncMeta::unsynced(at)) else {
                    return Ok(LocalEffect::NotFound);
                };
                let id = self.store.insert(record)?;
                Ok(LocalEffect::Created(id))
            }
            (Some((kind, LocalRef::Dangling(remote))), Source::Remote { event_timestamp }) => {
                let Some(record) = build(op, SyncMeta::mirrored(remote, event_timestamp)) else {
                    return Ok(LocalEffect::NotFound);
                };
                let id = self.store.insert(record)?;
                self.resolve_dangling(kind, remote, id, event_timestamp)?;
                debug!(%kind, local_id = %id, remote_id = %remote, "Materialized remote entity");
                Ok(LocalEffect::Created(id))
            }
            (Some((kind, LocalRef::Local(id))), Source::Remote { event_timestamp }) => {
                // Already known: a replayed creation overwrites the fields.
                let Some(existing) = self.store.get(kind, id)? else {
                    return Ok(LocalEffect::NotFound);
                };
                if existing.meta().is_stale(event_timestamp) {
                    return Ok(LocalEffect::Stale);
                }
                let mut meta = existing.meta().clone();
                meta.confirm(event_timestamp);
                let Some(record) = build(op, meta) else {
                    return Ok(LocalEffect::NotFound);
                };
                self.store.update(&record)?;
                Ok(LocalEffect::Updated(vec![(kind, id)]))
            }
            (subject, source) => {
                warn!(?subject, ?source, op = %op.kind(), "Creation with unexpected subject");
                Ok(LocalEffect::NotFound)
            }
        }
    }

    fn update(&self, op: &Operation<LocalRef>, source: Source) -> SyncResult<LocalEffect> {
        let mut written = Vec::new();
        let mut stale = false;

        for (kind, target) in op.targets() {
            let LocalRef::Local(id) = target else {
                continue;
            };
            let Some(mut record) = self.store.get(kind, id)? else {
                continue;
            };
            if let Source::Remote { event_timestamp } = source {
                if record.meta().is_stale(event_timestamp) {
                    stale = true;
                    continue;
                }
            }
            mutate(&mut record, op);
            stamp(record.meta_mut(), source);
            self.store.update(&record)?;
            written.push((kind, id));
        }

        Ok(match (written.is_empty(), stale) {
            (false, _) => LocalEffect::Updated(written),
            (true, true) => LocalEffect::Stale,
            (true, false) => LocalEffect::NotFound,
        })
    }

    fn delete(&self, op: &Operation<LocalRef>, source: Source) -> SyncResult<LocalEffect> {
        let roots: Vec<(EntityKind, LocalId)> = op
            .targets()
            .into_iter()
            .filter_map(|(kind, target)| target.local().map(|id| (kind, id)))
            .collect();

        let plan = tree::cascade(self.store.as_ref(), &roots)?;
        let mut removed = Vec::new();
        for (kind, id) in plan {
            if kind == EntityKind::Tag {
                self.detach_tag(id, source)?;
            }
            if self.store.delete(kind, id)? {
                removed.push((kind, id));
            }
        }

        if removed.is_empty() {
            Ok(LocalEffect::NotFound)
        } else {
            debug!(count = removed.len(), op = %op.kind(), "Deleted records");
            Ok(LocalEffect::Deleted(removed))
        }
    }

    fn detach_tag(&self, tag: LocalId, source: Source) -> SyncResult<()> {
        for record in self.store.list(EntityKind::Link)? {
            if let Record::Link(mut link) = record {
                if link.has_tag(tag) {
                    link.tags.retain(|t| *t != LocalRef::Local(tag));
                    if let Source::User { at } = source {
                        link.meta.touch(at);
                    }
                    self.store.update(&Record::Link(link))?;
                }
            }
        }
        Ok(())
    }

    /// Point references that were waiting for `(kind, remote)` at its new
    /// local id.
    fn resolve_dangling(
        &self,
        kind: EntityKind,
        remote: RemoteId,
        local: LocalId,
        at: Timestamp,
    ) -> SyncResult<()> {
        let waiting = LocalRef::Dangling(remote);
        let resolved = LocalRef::Local(local);
        let swap = |r: &mut LocalRef| {
            if *r == waiting {
                *r = resolved;
                true
            } else {
                false
            }
        };

        let scanned: &[EntityKind] = match kind {
            EntityKind::Folder => &[
                EntityKind::Folder,
                EntityKind::Link,
                EntityKind::PanelFolder,
            ],
            EntityKind::Tag => &[EntityKind::Link],
            EntityKind::Panel => &[EntityKind::PanelFolder],
            EntityKind::Link | EntityKind::PanelFolder => &[],
        };

        let mut resolved_count = 0usize;
        for &scan in scanned {
            for mut record in self.store.list(scan)? {
                let changed = match (&mut record, kind) {
                    (Record::Folder(f), EntityKind::Folder) => {
                        f.parent.as_mut().is_some_and(swap)
                    }
                    (Record::Link(l), EntityKind::Folder) => match &mut l.scope {
                        LinkScope::Folder(folder) => swap(folder),
                        _ => false,
                    },
                    (Record::Link(l), EntityKind::Tag) => {
                        l.tags.iter_mut().fold(false, |any, t| swap(t) || any)
                    }
                    (Record::PanelFolder(pf), EntityKind::Folder) => swap(&mut pf.folder),
                    (Record::PanelFolder(pf), EntityKind::Panel) => swap(&mut pf.panel),
                    _ => false,
                };
                if changed {
                    let meta = record.meta_mut();
                    meta.touch(at.max(meta.last_modified));
                    self.store.update(&record)?;
                    resolved_count += 1;
                }
            }
        }

        if resolved_count > 0 {
            debug!(
                %kind,
                remote_id = %remote,
                count = resolved_count,
                "Resolved dangling references"
            );
        }
        Ok(())
    }
}
