//! Remote authority transport
//!
//! The HTTP/WebSocket transport itself lives outside this crate; the engine
//! only depends on [`RemoteTransport`]. Two implementations ship here:
//! [`InMemoryRemote`], a loopback authority used by tests and demos, and
//! [`OfflineRemote`], which is never reachable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::context::Correlation;
use crate::error::RemoteError;
use crate::operation::{Operation, OperationKind};
use crate::types::{EntityKind, RemoteId, Timestamp};

mod memory;

pub use memory::InMemoryRemote;

/// An outbound mutation in remote id space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub operation: Operation<RemoteId>,
    pub correlation: Correlation,
    /// Client-side time of the local write
    pub event_timestamp: Timestamp,
}

/// Successful reply to a [`RemoteRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// Assigned to the created entity, for creation-class requests
    pub remote_id: Option<RemoteId>,
    /// Authoritative time of the change
    pub event_timestamp: Timestamp,
}

/// A change notification, pushed live or returned by catch-up.
///
/// Creation events carry the assigned remote id as the operation subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation: Operation<RemoteId>,
    pub correlation: Correlation,
    pub event_timestamp: Timestamp,
}

impl ChangeEvent {
    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}

/// A deletion recorded by the remote authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub kind: EntityKind,
    pub remote_id: RemoteId,
    pub deleted_at: Timestamp,
    pub correlation: Correlation,
}

impl Tombstone {
    /// The deletion-class change event equivalent to this tombstone.
    pub fn into_event(self) -> ChangeEvent {
        ChangeEvent {
            operation: Operation::delete(self.kind, self.remote_id),
            correlation: self.correlation,
            event_timestamp: self.deleted_at,
        }
    }
}

/// Channel to the remote authority.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Mirror one operation.
    async fn send(&self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError>;

    /// Non-deletion change events with `event_timestamp > since`, oldest first.
    async fn fetch_updates(&self, since: Timestamp) -> Result<Vec<ChangeEvent>, RemoteError>;

    /// Tombstones with `deleted_at > since`, oldest first.
    async fn fetch_tombstones(&self, since: Timestamp) -> Result<Vec<Tombstone>, RemoteError>;

    /// Open a live subscription. The channel closes when the connection drops.
    async fn subscribe(&self) -> Result<mpsc::Receiver<ChangeEvent>, RemoteError>;
}

/// A remote that is never reachable; every mirror attempt is queued.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

impl OfflineRemote {
    fn unreachable() -> RemoteError {
        RemoteError::Network("no remote configured".into())
    }
}

#[async_trait]
impl RemoteTransport for OfflineRemote {
    async fn send(&self, _request: RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        Err(Self::unreachable())
    }

    async fn fetch_updates(&self, _since: Timestamp) -> Result<Vec<ChangeEvent>, RemoteError> {
        Err(Self::unreachable())
    }

    async fn fetch_tombstones(&self, _since: Timestamp) -> Result<Vec<Tombstone>, RemoteError> {
        Err(Self::unreachable())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<ChangeEvent>, RemoteError> {
        Err(Self::unreachable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_into_event() {
        let correlation = Correlation::generate("phone");
        let event = Tombstone {
            kind: EntityKind::Link,
            remote_id: RemoteId(600),
            deleted_at: 1_000,
            correlation: correlation.clone(),
        }
        .into_event();

        assert_eq!(event.operation, Operation::DeleteLink { id: RemoteId(600) });
        assert_eq!(event.kind(), OperationKind::DeleteLink);
        assert_eq!(event.event_timestamp, 1_000);
        assert_eq!(event.correlation, correlation);
    }

    #[tokio::test]
    async fn test_offline_remote_always_fails() {
        let remote = OfflineRemote;
        assert!(matches!(
            remote.fetch_updates(0).await,
            Err(RemoteError::Network(_))
        ));
        assert!(remote.subscribe().await.is_err());
    }
}
