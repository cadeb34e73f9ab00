//! SyncEngine - the primary entry point
//!
//! Wires the record store, the remote transport and every sync component
//! together around one [`SyncContext`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use linksync_core::{InMemoryRemote, SyncConfig, SyncEngine};
//!
//! let remote = Arc::new(InMemoryRemote::new());
//! let engine = SyncEngine::open("~/.linksync", remote, SyncConfig::default())?;
//!
//! // Local-first: visible immediately, mirrored when possible
//! let reading = engine.gateway().create_folder("Reading", None).await?.value;
//!
//! // Follow the remote in the background
//! engine.start_sync();
//! println!("{}", engine.indicator()?);
//! ```

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::SyncConfig;
use crate::context::{Correlation, SyncContext};
use crate::error::SyncResult;
use crate::gateway::MutationGateway;
use crate::queue::PendingQueue;
use crate::remote::RemoteTransport;
use crate::storage::{QueueEntry, RecordStore, Storage};
use crate::sync::{
    CatchUpReconciler, CatchUpReport, ConnectionState, DrainReport, QueueDrainService,
    RemoteEventApplier, SyncEvent, SyncIndicator, SyncManager,
};
use crate::translate::IdTranslator;
use crate::types::{EntityKind, Folder, Link, Panel, PanelFolder, Record, Tag, Timestamp};

/// File name of the record store inside the data directory
pub const DATABASE_FILE: &str = "linksync.redb";

pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    ctx: SyncContext,
    queue: PendingQueue,
    gateway: MutationGateway,
    drain: QueueDrainService,
    reconciler: CatchUpReconciler,
    applier: RemoteEventApplier,
    manager: SyncManager,
}

impl SyncEngine {
    /// Build an engine over any record store.
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteTransport>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let correlation = Correlation::generate(config.display_name.clone());
        let ctx = SyncContext::new(store.clone(), correlation, config.event_channel_capacity)?;

        let queue = PendingQueue::new(store.clone());
        let gateway = MutationGateway::new(store.clone(), remote.clone(), ctx.clone());
        let applier =
            RemoteEventApplier::new(gateway.clone(), IdTranslator::new(store.clone()), ctx.clone());
        let reconciler =
            CatchUpReconciler::new(store.clone(), remote.clone(), ctx.clone(), applier.clone());
        let drain = QueueDrainService::new(store.clone(), remote.clone(), ctx.clone());
        let manager = SyncManager::new(
            remote,
            ctx.clone(),
            queue.clone(),
            drain.clone(),
            reconciler.clone(),
            applier.clone(),
            config,
        );

        let pending = queue.len()?;
        info!(
            client = %ctx.correlation,
            watermark = ctx.watermark.get(),
            pending,
            "Engine ready"
        );

        Ok(Self {
            store,
            ctx,
            queue,
            gateway,
            drain,
            reconciler,
            applier,
            manager,
        })
    }

    /// Open the redb-backed store in `data_dir`, creating it if needed.
    pub fn open(
        data_dir: impl AsRef<Path>,
        remote: Arc<dyn RemoteTransport>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let storage = Storage::new(data_dir.as_ref().join(DATABASE_FILE))?;
        Self::new(Arc::new(storage), remote, config)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Components
    // ═══════════════════════════════════════════════════════════════════════

    /// Entry point for every user mutation.
    pub fn gateway(&self) -> &MutationGateway {
        &self.gateway
    }

    pub fn applier(&self) -> &RemoteEventApplier {
        &self.applier
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn correlation(&self) -> &Correlation {
        &self.ctx.correlation
    }

    pub fn watermark(&self) -> Timestamp {
        self.ctx.watermark.get()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync control
    // ═══════════════════════════════════════════════════════════════════════

    /// Run one drain pass now.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        self.drain.drain(&CancellationToken::new()).await
    }

    /// Run one catch-up now.
    pub async fn catch_up(&self) -> SyncResult<CatchUpReport> {
        self.reconciler.run().await
    }

    /// Start the live subscription and periodic drain.
    pub fn start_sync(&self) -> bool {
        self.manager.start()
    }

    pub async fn stop_sync(&self) {
        self.manager.stop().await
    }

    pub fn connection(&self) -> ConnectionState {
        self.manager.connection()
    }

    pub fn indicator(&self) -> SyncResult<SyncIndicator> {
        Ok(SyncIndicator {
            connection: self.connection(),
            pending: self.queue.len()?,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.ctx.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    fn list<T>(&self, kind: EntityKind, into: fn(Record) -> Option<T>) -> SyncResult<Vec<T>> {
        Ok(self.store.list(kind)?.into_iter().filter_map(into).collect())
    }

    pub fn folders(&self) -> SyncResult<Vec<Folder>> {
        self.list(EntityKind::Folder, Record::into_folder)
    }

    pub fn links(&self) -> SyncResult<Vec<Link>> {
        self.list(EntityKind::Link, Record::into_link)
    }

    pub fn tags(&self) -> SyncResult<Vec<Tag>> {
        self.list(EntityKind::Tag, Record::into_tag)
    }

    pub fn panels(&self) -> SyncResult<Vec<Panel>> {
        self.list(EntityKind::Panel, Record::into_panel)
    }

    pub fn panel_folders(&self) -> SyncResult<Vec<PanelFolder>> {
        self.list(EntityKind::PanelFolder, Record::into_panel_folder)
    }

    /// Pending Operation Queue contents, oldest first.
    pub fn queued(&self) -> SyncResult<Vec<QueueEntry>> {
        self.queue.dequeue_all()
    }
}
