//! Synchronization with the remote authority
//!
//! - `drain`: replays the Pending Operation Queue
//! - `applier`: applies inbound change events
//! - `catchup`: pulls everything missed while offline
//! - `manager`: live subscription and periodic drain in the background

mod applier;
mod catchup;
mod drain;
mod events;
mod manager;
mod retry;

pub use applier::{ApplyOutcome, BatchReport, RemoteEventApplier};
pub use catchup::{CatchUpReconciler, CatchUpReport, PhaseReport};
pub use drain::{DrainReport, QueueDrainService};
pub use events::{ConnectionState, SyncEvent, SyncIndicator};
pub use manager::SyncManager;
pub use retry::Backoff;
