//! Error types for Linksync

use thiserror::Error;

use crate::types::{EntityKind, LocalId, RemoteId};

/// Main error type for Linksync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// A user mutation failed its local preconditions; nothing was written
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Entity was not found in the record store
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: LocalId },

    /// A local id inside an outbound payload has no remote id yet
    #[error("{kind} {id} has not been mirrored to the remote yet")]
    UnresolvedDependency { kind: EntityKind, id: LocalId },

    /// Attempt to re-assign the remote id of an already mirrored entity
    #[error("{kind} {local} already carries remote id {existing}, refusing {proposed}")]
    RemoteIdConflict {
        kind: EntityKind,
        local: LocalId,
        existing: RemoteId,
        proposed: RemoteId,
    },

    /// Remote authority call failed
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Error during storage operations
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Precondition failures raised by the mutation gateway before any write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must not be blank")]
    Blank(&'static str),

    #[error("\"{0}\" is a reserved name")]
    ReservedName(String),

    #[error("a {kind} named \"{name}\" already exists here")]
    DuplicateName { kind: EntityKind, name: String },

    #[error("folder {folder} cannot be placed under its own descendant {parent}")]
    Cycle { folder: LocalId, parent: LocalId },

    #[error("{kind} {id} does not exist")]
    MissingReference { kind: EntityKind, id: LocalId },

    #[error("folder {folder} is already attached to panel {panel}")]
    AlreadyAttached { panel: LocalId, folder: LocalId },

    #[error("selection is empty")]
    EmptySelection,
}

/// Failures reported by the remote transport.
///
/// Transient variants are retried on the next drain pass; semantic variants
/// mean the remote will never accept the request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("not authorized")]
    Unauthorized,

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("{kind} {id} no longer exists on the remote")]
    Gone { kind: EntityKind, id: RemoteId },

    #[error("remote rejected request: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether the remote has definitively refused the request.
    pub fn is_semantic(&self) -> bool {
        matches!(self, RemoteError::Gone { .. } | RemoteError::Rejected(_))
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::NotFound {
            kind: EntityKind::Folder,
            id: LocalId(7),
        };
        assert_eq!(format!("{}", err), "folder 7 not found");
    }

    #[test]
    fn test_validation_converts() {
        let err: SyncError = ValidationError::Blank("name").into();
        assert!(matches!(err, SyncError::Validation(ValidationError::Blank("name"))));
        assert_eq!(err.to_string(), "Validation failed: name must not be blank");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let sync_err: SyncError = io_err.into();
        assert!(matches!(sync_err, SyncError::Io(_)));
    }

    #[test]
    fn test_semantic_remote_errors() {
        assert!(RemoteError::Rejected("duplicate".into()).is_semantic());
        assert!(RemoteError::Gone {
            kind: EntityKind::Link,
            id: RemoteId(3)
        }
        .is_semantic());
        assert!(!RemoteError::Timeout.is_semantic());
        assert!(!RemoteError::Network("refused".into()).is_semantic());
        assert!(!RemoteError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_semantic());
    }
}
