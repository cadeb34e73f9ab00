//! Folder tree walks over the record store.
//!
//! Everything here uses explicit work stacks so arbitrarily deep trees never
//! grow the call stack.

use std::collections::HashSet;

use crate::error::SyncResult;
use crate::storage::RecordStore;
use crate::types::{EntityKind, Folder, LocalId, LocalRef, Record};

pub(crate) fn folders(store: &dyn RecordStore) -> SyncResult<Vec<Folder>> {
    Ok(store
        .list(EntityKind::Folder)?
        .into_iter()
        .filter_map(Record::into_folder)
        .collect())
}

/// Whether `candidate` is `ancestor` itself or lies anywhere beneath it.
pub(crate) fn is_within(
    store: &dyn RecordStore,
    ancestor: LocalId,
    candidate: LocalId,
) -> SyncResult<bool> {
    let mut seen = HashSet::new();
    let mut cursor = Some(candidate);
    while let Some(current) = cursor {
        if current == ancestor {
            return Ok(true);
        }
        if !seen.insert(current) {
            return Ok(false);
        }
        cursor = match store.get(EntityKind::Folder, current)? {
            Some(Record::Folder(folder)) => folder.parent.and_then(|p| p.local()),
            _ => None,
        };
    }
    Ok(false)
}

/// Everything removed, in order, when the given roots are deleted.
///
/// Folders take their descendant folders, contained links and panel
/// attachments with them; panels take their attachments.
pub(crate) fn cascade(
    store: &dyn RecordStore,
    roots: &[(EntityKind, LocalId)],
) -> SyncResult<Vec<(EntityKind, LocalId)>> {
    let mut plan = Vec::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<(EntityKind, LocalId)> = roots.iter().rev().copied().collect();

    while let Some((kind, id)) = stack.pop() {
        if !seen.insert((kind, id)) {
            continue;
        }
        plan.push((kind, id));

        match kind {
            EntityKind::Folder => {
                let owner = LocalRef::Local(id);
                for record in store.list(EntityKind::Folder)? {
                    if let Record::Folder(f) = record {
                        if f.parent == Some(owner) {
                            stack.push((EntityKind::Folder, f.meta.local_id));
                        }
                    }
                }
                for record in store.list(EntityKind::Link)? {
                    if let Record::Link(l) = record {
                        if l.scope.folder() == Some(&owner) {
                            stack.push((EntityKind::Link, l.meta.local_id));
                        }
                    }
                }
                for record in store.list(EntityKind::PanelFolder)? {
                    if let Record::PanelFolder(pf) = record {
                        if pf.pins(id) {
                            stack.push((EntityKind::PanelFolder, pf.meta.local_id));
                        }
                    }
                }
            }
            EntityKind::Panel => {
                for record in store.list(EntityKind::PanelFolder)? {
                    if let Record::PanelFolder(pf) = record {
                        if pf.is_on(id) {
                            stack.push((EntityKind::PanelFolder, pf.meta.local_id));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{Link, LinkScope, SyncMeta};

    fn add_folder(store: &MemoryStore, name: &str, parent: Option<LocalId>) -> LocalId {
        store
            .insert(Record::Folder(Folder {
                meta: SyncMeta::unsynced(1),
                name: name.into(),
                note: String::new(),
                parent: parent.map(LocalRef::Local),
                archived: false,
            }))
            .unwrap()
    }

    fn add_link(store: &MemoryStore, folder: LocalId) -> LocalId {
        store
            .insert(Record::Link(Link {
                meta: SyncMeta::unsynced(1),
                title: "t".into(),
                url: "https://t.test".into(),
                note: String::new(),
                scope: LinkScope::Folder(LocalRef::Local(folder)),
                important: false,
                archived: false,
                tags: Vec::new(),
            }))
            .unwrap()
    }

    #[test]
    fn test_is_within() {
        let store = MemoryStore::new();
        let a = add_folder(&store, "a", None);
        let b = add_folder(&store, "b", Some(a));
        let c = add_folder(&store, "c", Some(b));
        let other = add_folder(&store, "other", None);

        assert!(is_within(&store, a, c).unwrap());
        assert!(is_within(&store, a, a).unwrap());
        assert!(!is_within(&store, c, a).unwrap());
        assert!(!is_within(&store, a, other).unwrap());
    }

    #[test]
    fn test_deep_tree_does_not_recurse() {
        let store = MemoryStore::new();
        let root = add_folder(&store, "root", None);
        let mut parent = root;
        for i in 0..500 {
            parent = add_folder(&store, &format!("f{}", i), Some(parent));
        }
        assert!(is_within(&store, root, parent).unwrap());
        let plan = cascade(&store, &[(EntityKind::Folder, root)]).unwrap();
        assert_eq!(plan.len(), 501);
        assert_eq!(plan[0], (EntityKind::Folder, root));
        assert_eq!(plan[500], (EntityKind::Folder, parent));
    }

    #[test]
    fn test_cascade_collects_children_and_links() {
        let store = MemoryStore::new();
        let a = add_folder(&store, "a", None);
        let b = add_folder(&store, "b", Some(a));
        let link = add_link(&store, b);
        let untouched = add_folder(&store, "x", None);

        let plan = cascade(&store, &[(EntityKind::Folder, a)]).unwrap();
        assert_eq!(plan[0], (EntityKind::Folder, a));
        assert!(plan.contains(&(EntityKind::Folder, b)));
        assert!(plan.contains(&(EntityKind::Link, link)));
        assert!(!plan.contains(&(EntityKind::Folder, untouched)));
    }
}
