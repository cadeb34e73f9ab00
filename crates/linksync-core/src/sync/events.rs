//! Sync event types and the "syncing" indicator
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ConnectionState: live connection to the remote authority       │
//! │  ├── Disabled: sync turned off                                  │
//! │  ├── Connecting: subscribing and catching up                    │
//! │  ├── Online: live events flowing                                │
//! │  └── Offline: connection lost, retrying with backoff            │
//! │                                                                 │
//! │  SyncEvent: notifications about sync activity                   │
//! │  ├── ConnectionChanged / QueueDepthChanged                      │
//! │  ├── Drained / CaughtUp: pass reports                           │
//! │  ├── RemoteApplied: an inbound change reached the store         │
//! │  └── ApplyFailed: an inbound change was skipped                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use super::catchup::CatchUpReport;
use super::drain::DrainReport;
use crate::operation::OperationKind;
use crate::types::Timestamp;

/// State of the live connection to the remote authority
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disabled,
    Connecting,
    Online,
    Offline {
        reason: String,
    },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disabled => write!(f, "Disabled"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Online => write!(f, "Online"),
            ConnectionState::Offline { reason } => write!(f, "Offline: {}", reason),
        }
    }
}

/// Events emitted during synchronization
#[derive(Debug, Clone)]
pub enum SyncEvent {
    ConnectionChanged(ConnectionState),
    /// Pending Operation Queue depth after a change
    QueueDepthChanged { pending: usize },
    /// A drain pass finished
    Drained(DrainReport),
    /// A catch-up run finished
    CaughtUp(CatchUpReport),
    /// A change from another client was applied locally
    RemoteApplied {
        kind: OperationKind,
        event_timestamp: Timestamp,
    },
    /// An inbound change could not be applied and was skipped
    ApplyFailed {
        kind: OperationKind,
        event_timestamp: Timestamp,
        message: String,
    },
}

/// The persistent "syncing" indicator: connection state and outstanding
/// queue depth. Per-operation errors are deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncIndicator {
    pub connection: ConnectionState,
    pub pending: usize,
}

impl SyncIndicator {
    /// Whether there is sync work outstanding.
    pub fn is_syncing(&self) -> bool {
        self.pending > 0 || self.connection == ConnectionState::Connecting
    }

    /// Fold an event into the indicator.
    pub fn observe(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::ConnectionChanged(state) => self.connection = state.clone(),
            SyncEvent::QueueDepthChanged { pending } => self.pending = *pending,
            SyncEvent::Drained(report) => self.pending = report.remaining,
            _ => {}
        }
    }
}

impl fmt::Display for SyncIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pending {
            0 => write!(f, "{} (up to date)", self.connection),
            1 => write!(f, "{} (1 pending operation)", self.connection),
            n => write!(f, "{} ({} pending operations)", self.connection, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Online.to_string(), "Online");
        assert_eq!(
            ConnectionState::Offline {
                reason: "timeout".into()
            }
            .to_string(),
            "Offline: timeout"
        );
    }

    #[test]
    fn test_indicator_tracks_events() {
        let mut indicator = SyncIndicator::default();
        assert!(!indicator.is_syncing());

        indicator.observe(&SyncEvent::QueueDepthChanged { pending: 3 });
        assert!(indicator.is_syncing());
        assert_eq!(indicator.to_string(), "Disabled (3 pending operations)");

        indicator.observe(&SyncEvent::ConnectionChanged(ConnectionState::Online));
        indicator.observe(&SyncEvent::Drained(DrainReport {
            remaining: 0,
            ..DrainReport::default()
        }));
        assert!(!indicator.is_syncing());
        assert_eq!(indicator.to_string(), "Online (up to date)");
    }
}
