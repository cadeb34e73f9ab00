//! Linksync Core Library
//!
//! Offline-first synchronization for a link manager: folders, links, tags,
//! panels and the folders pinned to panels.
//!
//! ## Overview
//!
//! Every user mutation lands in the local store first and is mirrored to a
//! remote authority when possible. Whatever cannot be mirrored right away
//! waits in a durable Pending Operation Queue and is replayed in order once
//! the remote is reachable again. Changes made by other clients arrive as
//! change events, live or through catch-up, and are applied locally without
//! being sent back.
//!
//! ## Core Principles
//!
//! - **Local-first**: a mutation is visible before any network I/O
//! - **Two id spaces**: local ids never change; remote ids are bound once
//! - **Monotonic watermark**: catch-up always resumes where it left off
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use linksync_core::{LinkFields, LinkScope, OfflineRemote, SyncConfig, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = SyncEngine::open("./data", Arc::new(OfflineRemote), SyncConfig::default())?;
//!     let gateway = engine.gateway();
//!
//!     let rust = gateway.create_folder("Rust", None).await?.value;
//!     gateway
//!         .create_link(
//!             LinkFields::new("Docs", "https://docs.rs").in_scope(LinkScope::Folder(rust)),
//!         )
//!         .await?;
//!
//!     // Offline: both operations wait in the queue
//!     assert_eq!(engine.queued()?.len(), 2);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod operation;
pub mod queue;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod translate;
pub mod types;

// Re-exports
pub use config::SyncConfig;
pub use context::{Correlation, SyncContext, Watermark};
pub use engine::SyncEngine;
pub use error::{RemoteError, SyncError, SyncResult, ValidationError};
pub use gateway::{
    Applied, LocalEffect, MirrorFailure, MirrorOutcome, MutationGateway, OperationState,
};
pub use operation::{EventClass, FolderFields, LinkFields, Operation, OperationKind, Selection};
pub use queue::PendingQueue;
pub use remote::{
    ChangeEvent, InMemoryRemote, OfflineRemote, RemoteRequest, RemoteResponse, RemoteTransport,
    Tombstone,
};
pub use storage::{MemoryStore, QueueEntry, RecordStore, Storage};
pub use sync::{
    ApplyOutcome, BatchReport, CatchUpReconciler, CatchUpReport, ConnectionState, DrainReport,
    PhaseReport, QueueDrainService, RemoteEventApplier, SyncEvent, SyncIndicator, SyncManager,
};
pub use translate::IdTranslator;
pub use types::*;
