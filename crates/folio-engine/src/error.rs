//! Error types for engine operations.
//!
//! Every failure surfaced by the engine is an [`EngineError`]. Callers that
//! only need the coarse category (transport mapping, batch reporting) use
//! [`EngineError::kind`].

use folio_types::{BlockId, DocumentId, PrincipalId};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Document does not exist or is soft-deleted.
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// Block does not exist or is soft-deleted.
    #[error("block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("revision {doc_ver} not found for document {doc_id}")]
    RevisionNotFound { doc_id: DocumentId, doc_ver: u64 },

    /// Parent block missing or deleted.
    #[error("parent block {parent_id} not found in document {doc_id}")]
    ParentNotFound {
        doc_id: DocumentId,
        parent_id: BlockId,
    },

    #[error("{principal} may not {action} document {doc_id}")]
    Forbidden {
        principal: PrincipalId,
        action: &'static str,
        doc_id: DocumentId,
    },

    /// Parent block lives in a different document.
    #[error("parent {parent_id} belongs to document {parent_doc}, not {doc_id}")]
    CrossDocumentParent {
        doc_id: DocumentId,
        parent_id: BlockId,
        parent_doc: DocumentId,
    },

    #[error("cannot revert document {doc_id} to revision {target}: head is {head}")]
    InvalidRevert {
        doc_id: DocumentId,
        target: u64,
        head: u64,
    },

    #[error("invalid revision range {from}..{to} for document {doc_id} (head {head})")]
    InvalidRange {
        doc_id: DocumentId,
        from: u64,
        to: u64,
        head: u64,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A move would make a block its own ancestor.
    ///
    /// `path` runs from the proposed parent up to (and including) the moving
    /// block.
    #[error("moving {block_id} under {new_parent_id} would create a cycle")]
    CycleDetected {
        block_id: BlockId,
        new_parent_id: BlockId,
        path: Vec<BlockId>,
    },

    /// The root is absent from the version map and was never stored.
    #[error("root block {root_id} of document {doc_id} is missing")]
    RootMissing { doc_id: DocumentId, root_id: BlockId },

    /// The root is absent from the version map because it is deleted.
    #[error("root block {root_id} of document {doc_id} is deleted")]
    RootDeleted { doc_id: DocumentId, root_id: BlockId },

    /// Uniqueness collision that survived every retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Busy/locked storage that survived every retry.
    #[error("storage busy after {attempts} attempts: {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    /// Stored data violates an engine invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidArgument,
    CycleDetected,
    Conflict,
    TransientStorageError,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DocumentNotFound(_)
            | Self::BlockNotFound(_)
            | Self::RevisionNotFound { .. }
            | Self::ParentNotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::CrossDocumentParent { .. }
            | Self::InvalidRevert { .. }
            | Self::InvalidRange { .. }
            | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::CycleDetected { .. } => ErrorKind::CycleDetected,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Transient { .. } => ErrorKind::TransientStorageError,
            Self::Storage(e) if is_busy(e) => ErrorKind::TransientStorageError,
            Self::Storage(e) if is_unique_violation(e) => ErrorKind::Conflict,
            Self::RootMissing { .. }
            | Self::RootDeleted { .. }
            | Self::Storage(_)
            | Self::Serialization(_)
            | Self::Config(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether re-running the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => is_busy(e) || is_unique_violation(e),
            _ => false,
        }
    }

    /// Final form of a retryable error once attempts are exhausted.
    pub fn exhausted(self, attempts: u32) -> Self {
        match self {
            Self::Storage(e) if is_busy(&e) => Self::Transient {
                attempts,
                source: e,
            },
            Self::Storage(e) if is_unique_violation(&e) => {
                Self::Conflict(format!("{e} (after {attempts} attempts)"))
            }
            other => other,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && matches!(
                    err.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_busy_is_retryable_and_becomes_transient() {
        let err = EngineError::Storage(sqlite_failure(rusqlite::ffi::SQLITE_BUSY));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::TransientStorageError);
        let final_err = err.exhausted(4);
        assert!(matches!(final_err, EngineError::Transient { attempts: 4, .. }));
    }

    #[test]
    fn test_unique_violation_becomes_conflict() {
        let err = EngineError::Storage(sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY));
        assert!(err.is_retryable());
        assert!(matches!(err.exhausted(2), EngineError::Conflict(_)));
    }

    #[test]
    fn test_domain_errors_are_not_retryable() {
        let err = EngineError::BlockNotFound(BlockId::new());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.kind().as_ref(), "not_found");
    }

    #[test]
    fn test_cycle_kind() {
        let b = BlockId::new();
        let err = EngineError::CycleDetected {
            block_id: b,
            new_parent_id: b,
            path: vec![b],
        };
        assert_eq!(err.kind(), ErrorKind::CycleDetected);
    }
}
