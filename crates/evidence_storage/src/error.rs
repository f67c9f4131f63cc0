//! Store errors.

use evidence_chain::ChainError;
use evidence_core::{CoreError, EntryId};
use evidence_policy::AttributionViolation;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the evidence store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Used before `initialize` or after `close`
    #[error("evidence store is not ready: call initialize() first")]
    NotReady,

    #[error("evidence entry not found: {id}")]
    NotFound { id: EntryId },

    /// The writer lock was not acquired in time
    #[error("evidence store busy: writer lock not acquired within {waited:?}")]
    Busy { waited: Duration },

    #[error("invalid evidence: {0}")]
    Validation(#[from] CoreError),

    #[error("attribution violation: {0}")]
    Attribution(#[from] AttributionViolation),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded
    #[error("corrupt row {id}: {reason}")]
    CorruptRow { id: String, reason: String },

    #[error(transparent)]
    Chain(ChainError),
}

impl From<ChainError> for StoreError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::RootNotFound { id } => Self::NotFound { id },
            other => Self::Chain(other),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
