//! Results handed back to callers of the gateway.

use std::fmt;
use std::future::Future;

use futures::stream::{self, Stream, StreamExt};

use crate::error::{RemoteError, SyncResult};
use crate::types::{EntityKind, LocalId, Timestamp};

/// Why a mirror attempt did not reach the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorFailure {
    /// The transport call failed
    Transport(RemoteError),
    /// A referenced entity has no remote id yet
    Unresolved { kind: EntityKind, id: LocalId },
    /// Earlier operations were still queued; this one waits behind them
    QueuedBehind(usize),
}

impl fmt::Display for MirrorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorFailure::Transport(e) => write!(f, "{}", e),
            MirrorFailure::Unresolved { kind, id } => {
                write!(f, "{} {} is not mirrored yet", kind, id)
            }
            MirrorFailure::QueuedBehind(n) => write!(f, "queued behind {} pending operations", n),
        }
    }
}

/// Remote side of a gateway operation.
///
/// The local write has always happened when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// Applied locally only (inbound events, no-op writes)
    LocalApplied,
    RemoteMirrored { event_timestamp: Timestamp },
    /// Queued for a later drain pass
    RemoteFailed(MirrorFailure),
}

impl MirrorOutcome {
    pub fn is_mirrored(&self) -> bool {
        matches!(self, MirrorOutcome::RemoteMirrored { .. })
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, MirrorOutcome::RemoteFailed(_))
    }

    /// Fold the outcomes of a multi-step operation: any failure wins,
    /// otherwise the latest mirror.
    pub fn combine(self, next: MirrorOutcome) -> MirrorOutcome {
        match (self, next) {
            (failed @ MirrorOutcome::RemoteFailed(_), _) => failed,
            (_, failed @ MirrorOutcome::RemoteFailed(_)) => failed,
            (MirrorOutcome::LocalApplied, other) => other,
            (
                MirrorOutcome::RemoteMirrored { event_timestamp: a },
                MirrorOutcome::RemoteMirrored { event_timestamp: b },
            ) => MirrorOutcome::RemoteMirrored {
                event_timestamp: a.max(b),
            },
            (mirrored, MirrorOutcome::LocalApplied) => mirrored,
        }
    }
}

/// A completed gateway operation: its value and what happened remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    pub value: T,
    pub mirror: MirrorOutcome,
}

impl<T> Applied<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Applied<U> {
        Applied {
            value: f(self.value),
            mirror: self.mirror,
        }
    }
}

/// Progress of an operation as seen by a presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState<T> {
    Loading,
    Success(T),
    Failure(String),
}

/// Turn a gateway call into a stream of `Loading` followed by its result.
pub fn track<T, F>(operation: F) -> impl Stream<Item = OperationState<T>>
where
    F: Future<Output = SyncResult<T>>,
{
    stream::once(async { OperationState::Loading }).chain(stream::once(async move {
        match operation.await {
            Ok(value) => OperationState::Success(value),
            Err(e) => OperationState::Failure(e.to_string()),
        }
    }))
}
