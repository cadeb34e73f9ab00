//! Mutation Gateway
//!
//! Single entry point for every user-initiated change. Each call runs the
//! same protocol:
//!
//! ```text
//! validate ──► local write ──► queue non-empty? ──► enqueue (QueuedBehind)
//!                                   │
//!                                   ▼
//!                     translate ids ──► unresolved? ──► enqueue (Unresolved)
//!                                   │
//!                                   ▼
//!                     send ──► failed? ──► enqueue (Transport)
//!                                   │
//!                                   ▼
//!              assign remote id, stamp synced_at, advance watermark
//! ```
//!
//! The local write is synchronous and visible before any network I/O.
//! Mirror failures are never surfaced as errors: the operation is queued and
//! the call still succeeds.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult, ValidationError};
use crate::operation::{FolderFields, LinkFields, Operation, Selection};
use crate::queue::PendingQueue;
use crate::remote::{RemoteRequest, RemoteResponse, RemoteTransport};
use crate::storage::RecordStore;
use crate::sync::SyncEvent;
use crate::translate::IdTranslator;
use crate::types::{self, EntityKind, LinkScope, LocalId, LocalRef, Record, Timestamp};

mod local;
mod outcome;
pub(crate) mod tree;
mod validate;

pub use local::LocalEffect;
pub use outcome::{track, Applied, MirrorFailure, MirrorOutcome, OperationState};

use local::{LocalApplier, Source};
use validate::Validator;

/// Wraps every mutation in the local-then-remote protocol
#[derive(Clone)]
pub struct MutationGateway {
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteTransport>,
    ctx: SyncContext,
    queue: PendingQueue,
    translator: IdTranslator,
    local: LocalApplier,
}

impl MutationGateway {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteTransport>,
        ctx: SyncContext,
    ) -> Self {
        Self {
            queue: PendingQueue::new(store.clone()),
            translator: IdTranslator::new(store.clone()),
            local: LocalApplier::new(store.clone()),
            store,
            remote,
            ctx,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Protocol
    // ═══════════════════════════════════════════════════════════════════════

    /// Validate, apply locally and attempt to mirror a user operation.
    pub async fn submit(&self, op: Operation<LocalId>) -> SyncResult<Applied<LocalEffect>> {
        Validator::new(self.store.as_ref()).user(&op)?;

        let at = types::now();
        let effect = self
            .local
            .apply(&op.clone().map_ids(|_, id| LocalRef::Local(id)), Source::User { at })?;
        let op = match effect.created() {
            Some(id) => op.with_subject(id),
            None => op,
        };

        let mirror = self.mirror(op, at).await?;
        Ok(Applied {
            value: effect,
            mirror,
        })
    }

    async fn mirror(&self, op: Operation<LocalId>, at: Timestamp) -> SyncResult<MirrorOutcome> {
        let pending = self.queue.len()?;
        if pending > 0 {
            self.enqueue(&op)?;
            debug!(op = %op.kind(), pending, "Queued behind pending operations");
            return Ok(MirrorOutcome::RemoteFailed(MirrorFailure::QueuedBehind(
                pending,
            )));
        }

        let outbound = match self.translator.outbound(op.clone()) {
            Ok(outbound) => outbound,
            Err(SyncError::UnresolvedDependency { kind, id }) => {
                self.enqueue(&op)?;
                debug!(op = %op.kind(), %kind, %id, "Dependency not mirrored yet, queued");
                return Ok(MirrorOutcome::RemoteFailed(MirrorFailure::Unresolved {
                    kind,
                    id,
                }));
            }
            Err(e) => return Err(e),
        };

        let request = RemoteRequest {
            operation: outbound,
            correlation: self.ctx.correlation.clone(),
            event_timestamp: at,
        };
        match self.remote.send(request).await {
            Ok(response) => {
                confirm_mirrored(self.store.as_ref(), &self.ctx, &op, response)?;
                info!(
                    op = %op.kind(),
                    event_timestamp = response.event_timestamp,
                    "Mirrored operation"
                );
                Ok(MirrorOutcome::RemoteMirrored {
                    event_timestamp: response.event_timestamp,
                })
            }
            Err(e) => {
                self.enqueue(&op)?;
                info!(op = %op.kind(), error = %e, "Mirror failed, queued for retry");
                Ok(MirrorOutcome::RemoteFailed(MirrorFailure::Transport(e)))
            }
        }
    }

    fn enqueue(&self, op: &Operation<LocalId>) -> SyncResult<()> {
        self.queue.enqueue(op)?;
        self.ctx.emit(SyncEvent::QueueDepthChanged {
            pending: self.queue.len()?,
        });
        Ok(())
    }

    /// Apply a change received from the remote authority. Never mirrors.
    pub(crate) fn apply_inbound(
        &self,
        op: &Operation<LocalRef>,
        event_timestamp: Timestamp,
    ) -> SyncResult<LocalEffect> {
        Validator::new(self.store.as_ref()).inbound(op)?;
        self.local.apply(op, Source::Remote { event_timestamp })
    }

    async fn create(&self, op: Operation<LocalId>) -> SyncResult<Applied<LocalId>> {
        let applied = self.submit(op).await?;
        let id = applied
            .value
            .created()
            .ok_or_else(|| SyncError::Storage("creation produced no record".into()))?;
        Ok(applied.map(|_| id))
    }

    async fn write(&self, op: Operation<LocalId>) -> SyncResult<Applied<()>> {
        Ok(self.submit(op).await?.map(drop))
    }

    async fn remove(
        &self,
        op: Operation<LocalId>,
    ) -> SyncResult<Applied<Vec<(EntityKind, LocalId)>>> {
        Ok(self.submit(op).await?.map(|effect| effect.removed().to_vec()))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Folders
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_folder(
        &self,
        name: impl Into<String>,
        parent: Option<LocalId>,
    ) -> SyncResult<Applied<LocalId>> {
        let mut folder = FolderFields::named(name);
        folder.parent = parent;
        self.create_folder_with(folder).await
    }

    pub async fn create_folder_with(
        &self,
        folder: FolderFields<LocalId>,
    ) -> SyncResult<Applied<LocalId>> {
        self.create(Operation::CreateFolder { id: None, folder }).await
    }

    pub async fn rename_folder(
        &self,
        id: LocalId,
        name: impl Into<String>,
    ) -> SyncResult<Applied<()>> {
        self.write(Operation::RenameFolder {
            id,
            name: name.into(),
        })
        .await
    }

    pub async fn update_folder_note(
        &self,
        id: LocalId,
        note: impl Into<String>,
    ) -> SyncResult<Applied<()>> {
        self.write(Operation::UpdateFolderNote {
            id,
            note: note.into(),
        })
        .await
    }

    /// Move a folder under `parent`, or to the root with `None`.
    pub async fn move_folder(
        &self,
        id: LocalId,
        parent: Option<LocalId>,
    ) -> SyncResult<Applied<()>> {
        self.write(Operation::MoveFolder { id, parent }).await
    }

    pub async fn archive_folder(&self, id: LocalId) -> SyncResult<Applied<()>> {
        self.write(Operation::ArchiveFolder { id }).await
    }

    pub async fn unarchive_folder(&self, id: LocalId) -> SyncResult<Applied<()>> {
        self.write(Operation::UnarchiveFolder { id }).await
    }

    /// Delete a folder with its subfolders, links and panel attachments.
    pub async fn delete_folder(
        &self,
        id: LocalId,
    ) -> SyncResult<Applied<Vec<(EntityKind, LocalId)>>> {
        self.remove(Operation::DeleteFolder { id }).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Links
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_link(&self, link: LinkFields<LocalId>) -> SyncResult<Applied<LocalId>> {
        self.create(Operation::CreateLink { id: None, link }).await
    }

    pub async fn update_link(
        &self,
        id: LocalId,
        title: impl Into<String>,
        url: impl Into<String>,
        note: impl Into<String>,
    ) -> SyncResult<Applied<()>> {
        self.write(Operation::UpdateLink {
            id,
            title: title.into(),
            url: url.into(),
            note: note.into(),
        })
        .await
    }

    pub async fn move_link(
        &self,
        id: LocalId,
        scope: LinkScope<LocalId>,
    ) -> SyncResult<Applied<()>> {
        self.write(Operation::MoveLink { id, scope }).await
    }

    pub async fn archive_link(&self, id: LocalId) -> SyncResult<Applied<()>> {
        self.write(Operation::ArchiveLink { id }).await
    }

    pub async fn unarchive_link(&self, id: LocalId) -> SyncResult<Applied<()>> {
        self.write(Operation::UnarchiveLink { id }).await
    }

    pub async fn set_link_importance(
        &self,
        id: LocalId,
        important: bool,
    ) -> SyncResult<Applied<()>> {
        self.write(Operation::SetLinkImportance { id, important }).await
    }

    pub async fn set_link_tags(&self, id: LocalId, tags: Vec<LocalId>) -> SyncResult<Applied<()>> {
        self.write(Operation::SetLinkTags { id, tags }).await
    }

    pub async fn delete_link(
        &self,
        id: LocalId,
    ) -> SyncResult<Applied<Vec<(EntityKind, LocalId)>>> {
        self.remove(Operation::DeleteLink { id }).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Tags
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_tag(&self, name: impl Into<String>) -> SyncResult<Applied<LocalId>> {
        self.create(Operation::CreateTag {
            id: None,
            name: name.into(),
        })
        .await
    }

    pub async fn rename_tag(
        &self,
        id: LocalId,
        name: impl Into<String>,
    ) -> SyncResult<Applied<()>> {
        self.write(Operation::RenameTag {
            id,
            name: name.into(),
        })
        .await
    }

    /// Delete a tag and detach it from every link.
    pub async fn delete_tag(&self, id: LocalId) -> SyncResult<Applied<Vec<(EntityKind, LocalId)>>> {
        self.remove(Operation::DeleteTag { id }).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Panels
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn create_panel(&self, name: impl Into<String>) -> SyncResult<Applied<LocalId>> {
        self.create(Operation::CreatePanel {
            id: None,
            name: name.into(),
        })
        .await
    }

    pub async fn rename_panel(
        &self,
        id: LocalId,
        name: impl Into<String>,
    ) -> SyncResult<Applied<()>> {
        self.write(Operation::RenamePanel {
            id,
            name: name.into(),
        })
        .await
    }

    pub async fn delete_panel(
        &self,
        id: LocalId,
    ) -> SyncResult<Applied<Vec<(EntityKind, LocalId)>>> {
        self.remove(Operation::DeletePanel { id }).await
    }

    /// Attach a folder to the end of a panel.
    pub async fn add_folder_to_panel(
        &self,
        panel: LocalId,
        folder: LocalId,
    ) -> SyncResult<Applied<LocalId>> {
        let position = self
            .store
            .list(EntityKind::PanelFolder)?
            .iter()
            .filter(|r| matches!(r, Record::PanelFolder(pf) if pf.is_on(panel)))
            .count() as i64;
        self.create(Operation::AddPanelFolder {
            id: None,
            panel,
            folder,
            position,
        })
        .await
    }

    pub async fn remove_folder_from_panel(&self, id: LocalId) -> SyncResult<Applied<()>> {
        self.write(Operation::RemovePanelFolder { id }).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bulk
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn archive_many(&self, selection: Selection<LocalId>) -> SyncResult<Applied<()>> {
        self.write(Operation::ArchiveMany { selection }).await
    }

    pub async fn unarchive_many(&self, selection: Selection<LocalId>) -> SyncResult<Applied<()>> {
        self.write(Operation::UnarchiveMany { selection }).await
    }

    pub async fn delete_many(
        &self,
        selection: Selection<LocalId>,
    ) -> SyncResult<Applied<Vec<(EntityKind, LocalId)>>> {
        self.remove(Operation::DeleteMany { selection }).await
    }

    /// Move folders under `target` and links into it; `None` means the root
    /// for folders and the saved-links scope for links.
    pub async fn move_many(
        &self,
        selection: Selection<LocalId>,
        target: Option<LocalId>,
    ) -> SyncResult<Applied<()>> {
        self.write(Operation::MoveMany { selection, target }).await
    }

    /// Copy folders (with their whole subtree and links) and links into
    /// `target`. Every copy is an ordinary creation, issued parent first.
    ///
    /// Returns the ids of the top-level copies.
    pub async fn copy_many(
        &self,
        selection: Selection<LocalId>,
        target: Option<LocalId>,
    ) -> SyncResult<Applied<Vec<LocalId>>> {
        if selection.is_empty() {
            return Err(ValidationError::EmptySelection.into());
        }
        if let Some(target) = target {
            self.require_folder(target)?;
            for folder in &selection.folders {
                if tree::is_within(self.store.as_ref(), *folder, target)? {
                    return Err(ValidationError::Cycle {
                        folder: *folder,
                        parent: target,
                    }
                    .into());
                }
            }
        }

        let mut mirror = MirrorOutcome::LocalApplied;
        let mut roots = Vec::new();

        // (source folder, destination parent, is top level)
        let mut work: std::collections::VecDeque<(LocalId, Option<LocalId>, bool)> = selection
            .folders
            .iter()
            .map(|f| (*f, target, true))
            .collect();

        while let Some((source, parent, top)) = work.pop_front() {
            let original = self.require_folder(source)?;
            let name = self.free_folder_name(&original.name, parent)?;
            let copy = self
                .create_folder_with(FolderFields {
                    name,
                    note: original.note.clone(),
                    parent,
                    archived: original.archived,
                })
                .await?;
            mirror = mirror.combine(copy.mirror);
            if top {
                roots.push(copy.value);
            }

            for record in self.store.list(EntityKind::Folder)? {
                if let Record::Folder(child) = record {
                    if child.parent == Some(LocalRef::Local(source)) {
                        work.push_back((child.meta.local_id, Some(copy.value), false));
                    }
                }
            }
            for record in self.store.list(EntityKind::Link)? {
                if let Record::Link(link) = record {
                    if link.scope.folder() == Some(&LocalRef::Local(source)) {
                        let copied = self
                            .copy_link(&link, LinkScope::Folder(copy.value))
                            .await?;
                        mirror = mirror.combine(copied.mirror);
                    }
                }
            }
        }

        let scope = target.map_or(LinkScope::Saved, LinkScope::Folder);
        for id in &selection.links {
            let link = self
                .store
                .get(EntityKind::Link, *id)?
                .and_then(Record::into_link)
                .ok_or(ValidationError::MissingReference {
                    kind: EntityKind::Link,
                    id: *id,
                })?;
            let copied = self.copy_link(&link, scope).await?;
            mirror = mirror.combine(copied.mirror);
            roots.push(copied.value);
        }

        Ok(Applied {
            value: roots,
            mirror,
        })
    }

    async fn copy_link(
        &self,
        link: &types::Link,
        scope: LinkScope<LocalId>,
    ) -> SyncResult<Applied<LocalId>> {
        self.create_link(LinkFields {
            title: link.title.clone(),
            url: link.url.clone(),
            note: link.note.clone(),
            scope,
            important: link.important,
            archived: link.archived,
            tags: link.tags.iter().filter_map(LocalRef::local).collect(),
        })
        .await
    }

    fn require_folder(&self, id: LocalId) -> SyncResult<types::Folder> {
        self.store
            .get(EntityKind::Folder, id)?
            .and_then(Record::into_folder)
            .ok_or_else(|| {
                ValidationError::MissingReference {
                    kind: EntityKind::Folder,
                    id,
                }
                .into()
            })
    }

    /// `name`, or `name (copy)`, `name (copy 2)`, ... whichever is free
    /// under `parent`.
    fn free_folder_name(&self, name: &str, parent: Option<LocalId>) -> SyncResult<String> {
        let parent = parent.map(LocalRef::Local);
        let taken: Vec<String> = tree::folders(self.store.as_ref())?
            .into_iter()
            .filter(|f| f.parent == parent)
            .map(|f| f.name.trim().to_lowercase())
            .collect();
        let free = |candidate: &str| !taken.contains(&candidate.trim().to_lowercase());

        if free(name) {
            return Ok(name.to_string());
        }
        let mut n = 1;
        loop {
            let candidate = if n == 1 {
                format!("{} (copy)", name)
            } else {
                format!("{} (copy {})", name, n)
            };
            if free(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

/// Record a successful mirror: bind the created entity's remote id, stamp
/// every written entity with the authoritative timestamp and advance the
/// watermark.
pub(crate) fn confirm_mirrored(
    store: &dyn RecordStore,
    ctx: &SyncContext,
    op: &Operation<LocalId>,
    response: RemoteResponse,
) -> SyncResult<()> {
    if let (Some((kind, local)), Some(remote)) = (
        op.created_kind().zip(op.subject().map(|(_, id)| id)),
        response.remote_id,
    ) {
        store.assign_remote_id(kind, local, remote)?;
        debug!(%kind, local_id = %local, remote_id = %remote, "Assigned remote id");
    }

    for (kind, id) in op.targets() {
        if let Some(mut record) = store.get(kind, id)? {
            record.meta_mut().confirm(response.event_timestamp);
            store.update(&record)?;
        }
    }

    ctx.watermark.advance(response.event_timestamp)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Correlation;
    use crate::remote::InMemoryRemote;
    use crate::storage::MemoryStore;

    struct Harness {
        store: Arc<dyn RecordStore>,
        remote: Arc<InMemoryRemote>,
        ctx: SyncContext,
        gateway: MutationGateway,
    }

    fn harness() -> Harness {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let remote = Arc::new(InMemoryRemote::new());
        let ctx = SyncContext::new(store.clone(), Correlation::generate("test"), 16).unwrap();
        let gateway = MutationGateway::new(store.clone(), remote.clone(), ctx.clone());
        Harness {
            store,
            remote,
            ctx,
            gateway,
        }
    }

    #[tokio::test]
    async fn test_online_create_is_mirrored() {
        let h = harness();
        let applied = h.gateway.create_folder("Reading", None).await.unwrap();

        let MirrorOutcome::RemoteMirrored { event_timestamp } = applied.mirror else {
            panic!("expected mirror, got {:?}", applied.mirror);
        };
        let folder = h.store.get(EntityKind::Folder, applied.value).unwrap().unwrap();
        assert_eq!(folder.remote_id(), Some(types::RemoteId(501)));
        assert_eq!(folder.meta().synced_at, Some(event_timestamp));
        assert_eq!(h.ctx.watermark.get(), event_timestamp);
        assert_eq!(h.store.queue_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_create_is_queued_and_visible() {
        let h = harness();
        h.remote.set_online(false);

        let applied = h.gateway.create_folder("Reading", None).await.unwrap();
        assert!(matches!(
            applied.mirror,
            MirrorOutcome::RemoteFailed(MirrorFailure::Transport(_))
        ));
        let folder = h.store.get(EntityKind::Folder, applied.value).unwrap().unwrap();
        assert_eq!(folder.label(), "Reading");
        assert_eq!(folder.remote_id(), None);
        assert_eq!(h.store.queue_len().unwrap(), 1);
        assert_eq!(h.ctx.watermark.get(), 0);
    }

    #[tokio::test]
    async fn test_later_operations_queue_behind() {
        let h = harness();
        h.remote.set_online(false);
        let folder = h.gateway.create_folder("Reading", None).await.unwrap().value;
        h.remote.set_online(true);

        let applied = h.gateway.rename_folder(folder, "Later").await.unwrap();
        assert_eq!(
            applied.mirror,
            MirrorOutcome::RemoteFailed(MirrorFailure::QueuedBehind(1))
        );
        assert_eq!(h.store.queue_len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_validation_failure_writes_nothing() {
        let h = harness();
        let err = h.gateway.create_folder("History", None).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Validation(ValidationError::ReservedName(_))
        ));
        assert!(h.store.list(EntityKind::Folder).unwrap().is_empty());
        assert_eq!(h.store.queue_len().unwrap(), 0);
        assert!(h.remote.ids(EntityKind::Folder).is_empty());
    }

    #[tokio::test]
    async fn test_delete_folder_cascades() {
        let h = harness();
        let root = h.gateway.create_folder("Root", None).await.unwrap().value;
        let child = h.gateway.create_folder("Child", Some(root)).await.unwrap().value;
        let link = h
            .gateway
            .create_link(
                LinkFields::new("Docs", "https://docs.rs").in_scope(LinkScope::Folder(child)),
            )
            .await
            .unwrap()
            .value;

        let removed = h.gateway.delete_folder(root).await.unwrap();
        assert!(removed.mirror.is_mirrored());
        assert_eq!(removed.value.len(), 3);
        assert!(removed.value.contains(&(EntityKind::Link, link)));
        assert!(h.remote.ids(EntityKind::Folder).is_empty());
        assert!(h.remote.ids(EntityKind::Link).is_empty());
    }

    #[tokio::test]
    async fn test_copy_many_copies_subtree_parent_first() {
        let h = harness();
        let root = h.gateway.create_folder("Root", None).await.unwrap().value;
        let child = h.gateway.create_folder("Child", Some(root)).await.unwrap().value;
        h.gateway
            .create_link(
                LinkFields::new("Docs", "https://docs.rs").in_scope(LinkScope::Folder(child)),
            )
            .await
            .unwrap();

        let copied = h
            .gateway
            .copy_many(Selection::folders(vec![root]), None)
            .await
            .unwrap();
        assert_eq!(copied.value.len(), 1);
        assert!(copied.mirror.is_mirrored());

        let copy = h
            .store
            .get(EntityKind::Folder, copied.value[0])
            .unwrap()
            .unwrap();
        assert_eq!(copy.label(), "Root (copy)");
        assert_eq!(h.store.list(EntityKind::Folder).unwrap().len(), 4);
        assert_eq!(h.store.list(EntityKind::Link).unwrap().len(), 2);
        assert_eq!(h.remote.ids(EntityKind::Folder).len(), 4);
    }

    #[tokio::test]
    async fn test_copy_into_own_subtree_rejected() {
        let h = harness();
        let root = h.gateway.create_folder("Root", None).await.unwrap().value;
        let child = h.gateway.create_folder("Child", Some(root)).await.unwrap().value;
        let err = h
            .gateway
            .copy_many(Selection::folders(vec![root]), Some(child))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Validation(ValidationError::Cycle { .. })
        ));
    }

    #[tokio::test]
    async fn test_panel_positions_increase() {
        let h = harness();
        let panel = h.gateway.create_panel("Work").await.unwrap().value;
        let a = h.gateway.create_folder("A", None).await.unwrap().value;
        let b = h.gateway.create_folder("B", None).await.unwrap().value;

        let first = h.gateway.add_folder_to_panel(panel, a).await.unwrap().value;
        let second = h.gateway.add_folder_to_panel(panel, b).await.unwrap().value;
        let position = |id| match h.store.get(EntityKind::PanelFolder, id).unwrap().unwrap() {
            Record::PanelFolder(pf) => pf.position,
            _ => unreachable!(),
        };
        assert_eq!(position(first), 0);
        assert_eq!(position(second), 1);

        let err = h.gateway.add_folder_to_panel(panel, a).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Validation(ValidationError::AlreadyAttached { .. })
        ));
    }
}
