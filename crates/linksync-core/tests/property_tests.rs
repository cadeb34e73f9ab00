//! Property-based tests for offline operation sequences
//!
//! Any sequence of valid mutations issued while offline must, once the
//! remote is back, drain to an empty queue with every surviving record
//! mirrored.

use std::sync::Arc;

use linksync_core::{
    EntityKind, InMemoryRemote, LinkFields, LinkScope, LocalId, MemoryStore, RecordStore,
    Selection, SyncConfig, SyncEngine,
};
use proptest::prelude::*;

// ============================================================================
// Strategy Generators
// ============================================================================

/// Mutations over indices into whatever entities exist at that point
#[derive(Debug, Clone)]
enum OfflineOp {
    CreateFolder { parent: Option<usize> },
    CreateLink { folder: Option<usize> },
    CreateTag,
    RenameFolder(usize),
    MoveFolder { folder: usize, parent: Option<usize> },
    ArchiveLink(usize),
    TagLink { link: usize, tag: usize },
    DeleteFolder(usize),
    DeleteTag(usize),
    ArchiveMany { folder: usize, link: usize },
}

fn index() -> impl Strategy<Value = usize> {
    0..16usize
}

fn offline_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<OfflineOp>> {
    prop::collection::vec(
        prop_oneof![
            4 => prop::option::of(index()).prop_map(|parent| OfflineOp::CreateFolder { parent }),
            3 => prop::option::of(index()).prop_map(|folder| OfflineOp::CreateLink { folder }),
            1 => Just(OfflineOp::CreateTag),
            1 => index().prop_map(OfflineOp::RenameFolder),
            1 => (index(), prop::option::of(index()))
                .prop_map(|(folder, parent)| OfflineOp::MoveFolder { folder, parent }),
            1 => index().prop_map(OfflineOp::ArchiveLink),
            1 => (index(), index()).prop_map(|(link, tag)| OfflineOp::TagLink { link, tag }),
            1 => index().prop_map(OfflineOp::DeleteFolder),
            1 => index().prop_map(OfflineOp::DeleteTag),
            1 => (index(), index())
                .prop_map(|(folder, link)| OfflineOp::ArchiveMany { folder, link }),
        ],
        1..max_ops,
    )
}

// ============================================================================
// Helpers
// ============================================================================

fn live(store: &dyn RecordStore, kind: EntityKind) -> Vec<LocalId> {
    store
        .list(kind)
        .unwrap()
        .iter()
        .map(|r| r.local_id())
        .collect()
}

fn pick(ids: &[LocalId], i: usize) -> Option<LocalId> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[i % ids.len()])
    }
}

/// Issue one op; ops the validator rejects (cycles, duplicates) are fine to
/// skip since they never reach the store or the queue.
async fn issue(engine: &SyncEngine, op: &OfflineOp, counter: &mut usize) {
    let store = engine.store().as_ref();
    let gateway = engine.gateway();
    let folders = live(store, EntityKind::Folder);
    let links = live(store, EntityKind::Link);
    let tags = live(store, EntityKind::Tag);
    *counter += 1;
    let n = *counter;

    let _ = match op {
        OfflineOp::CreateFolder { parent } => gateway
            .create_folder(format!("folder {}", n), parent.and_then(|p| pick(&folders, p)))
            .await
            .map(drop),
        OfflineOp::CreateLink { folder } => {
            let scope = match folder.and_then(|f| pick(&folders, f)) {
                Some(folder) => LinkScope::Folder(folder),
                None => LinkScope::Saved,
            };
            gateway
                .create_link(
                    LinkFields::new(format!("link {}", n), "https://example.test").in_scope(scope),
                )
                .await
                .map(drop)
        }
        OfflineOp::CreateTag => gateway.create_tag(format!("tag {}", n)).await.map(drop),
        OfflineOp::RenameFolder(i) => match pick(&folders, *i) {
            Some(id) => gateway.rename_folder(id, format!("renamed {}", n)).await.map(drop),
            None => Ok(()),
        },
        OfflineOp::MoveFolder { folder, parent } => match pick(&folders, *folder) {
            Some(id) => gateway
                .move_folder(id, parent.and_then(|p| pick(&folders, p)))
                .await
                .map(drop),
            None => Ok(()),
        },
        OfflineOp::ArchiveLink(i) => match pick(&links, *i) {
            Some(id) => gateway.archive_link(id).await.map(drop),
            None => Ok(()),
        },
        OfflineOp::TagLink { link, tag } => match (pick(&links, *link), pick(&tags, *tag)) {
            (Some(link), Some(tag)) => gateway.set_link_tags(link, vec![tag]).await.map(drop),
            _ => Ok(()),
        },
        OfflineOp::DeleteFolder(i) => match pick(&folders, *i) {
            Some(id) => gateway.delete_folder(id).await.map(drop),
            None => Ok(()),
        },
        OfflineOp::DeleteTag(i) => match pick(&tags, *i) {
            Some(id) => gateway.delete_tag(id).await.map(drop),
            None => Ok(()),
        },
        OfflineOp::ArchiveMany { folder, link } => {
            let selection = Selection::new(
                pick(&folders, *folder).into_iter().collect(),
                pick(&links, *link).into_iter().collect(),
            );
            if selection.is_empty() {
                Ok(())
            } else {
                gateway.archive_many(selection).await.map(drop)
            }
        }
    };
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Offline work always drains completely once the remote is reachable
    #[test]
    fn offline_sequences_drain_to_empty(ops in offline_ops_strategy(40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let remote = Arc::new(InMemoryRemote::new());
            let engine = SyncEngine::new(
                Arc::new(MemoryStore::new()),
                remote.clone(),
                SyncConfig::default(),
            )
            .unwrap();

            remote.set_online(false);
            let mut counter = 0;
            for op in &ops {
                issue(&engine, op, &mut counter).await;
            }

            remote.set_online(true);
            for _ in 0..ops.len() + 1 {
                if engine.drain().await.unwrap().remaining == 0 {
                    break;
                }
            }

            prop_assert!(engine.queued().unwrap().is_empty());
            for kind in EntityKind::ALL {
                let unsynced = engine.store().list_unsynced(kind).unwrap();
                prop_assert!(unsynced.is_empty(), "unsynced {}: {:?}", kind, unsynced);
            }
            prop_assert_eq!(
                remote.ids(EntityKind::Folder).len(),
                engine.folders().unwrap().len()
            );
            prop_assert_eq!(
                remote.ids(EntityKind::Link).len(),
                engine.links().unwrap().len()
            );
            Ok(())
        })?;
    }

    /// Local ids are assigned in order and never reused, even after deletes
    #[test]
    fn local_ids_are_never_reused(deletes in prop::collection::vec(any::<bool>(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let remote = Arc::new(InMemoryRemote::new());
            remote.set_online(false);
            let engine = SyncEngine::new(
                Arc::new(MemoryStore::new()),
                remote,
                SyncConfig::default(),
            )
            .unwrap();

            let mut previous = LocalId(0);
            for (i, delete) in deletes.iter().enumerate() {
                let id = engine.gateway().create_tag(format!("t{}", i)).await.unwrap().value;
                prop_assert!(id > previous);
                previous = id;
                if *delete {
                    engine.gateway().delete_tag(id).await.unwrap();
                }
            }
            Ok(())
        })?;
    }
}
