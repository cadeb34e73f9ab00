//! Per-session sync context
//!
//! [`SyncContext`] bundles the state every component shares: who this client
//! is on the wire, the process-wide watermark and the event channel. It is
//! injected into each component constructor, so two sessions in one process
//! (for instance two simulated clients in a test) never share anything.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::error::SyncResult;
use crate::storage::RecordStore;
use crate::sync::SyncEvent;
use crate::types::Timestamp;

/// Token attached to every outbound mutation so its echo can be recognized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correlation {
    pub client_instance_id: String,
    pub display_name: String,
}

impl Correlation {
    /// A fresh token for a new logical session.
    pub fn generate(display_name: impl Into<String>) -> Self {
        Self {
            client_instance_id: Ulid::new().to_string(),
            display_name: display_name.into(),
        }
    }

    /// Whether `other` was produced by the same client session.
    pub fn same_client(&self, other: &Correlation) -> bool {
        self.client_instance_id == other.client_instance_id
    }
}

impl fmt::Display for Correlation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.client_instance_id)
    }
}

/// The synchronization watermark.
///
/// Persisted through the record store and cached in memory. All writers go
/// through [`Watermark::advance`], which only ever moves forward.
#[derive(Clone)]
pub struct Watermark {
    store: Arc<dyn RecordStore>,
    cached: Arc<AtomicI64>,
}

impl Watermark {
    pub fn load(store: Arc<dyn RecordStore>) -> SyncResult<Self> {
        let current = store.watermark()?;
        Ok(Self {
            store,
            cached: Arc::new(AtomicI64::new(current)),
        })
    }

    pub fn get(&self) -> Timestamp {
        self.cached.load(Ordering::SeqCst)
    }

    /// Move the watermark to `max(current, proposed)`.
    pub fn advance(&self, proposed: Timestamp) -> SyncResult<Timestamp> {
        let stored = self.store.advance_watermark(proposed)?;
        let previous = self.cached.fetch_max(stored, Ordering::SeqCst);
        Ok(previous.max(stored))
    }
}

/// Shared state injected into every sync component.
#[derive(Clone)]
pub struct SyncContext {
    pub correlation: Correlation,
    pub watermark: Watermark,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncContext {
    pub fn new(
        store: Arc<dyn RecordStore>,
        correlation: Correlation,
        event_capacity: usize,
    ) -> SyncResult<Self> {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Ok(Self {
            correlation,
            watermark: Watermark::load(store)?,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Publish an event; having no subscribers is fine.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }
}
