//! Chain construction errors.

use evidence_core::EntryId;
use thiserror::Error;

/// Errors raised while building a chain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The requested root does not exist
    #[error("root entry not found: {id}")]
    RootNotFound {
        /// Requested root id
        id: EntryId,
    },

    /// Unrecognised propagation rule name
    #[error("unknown propagation rule: {value}")]
    UnknownRule {
        /// The rejected name
        value: String,
    },
}

/// Result type for chain operations
pub type ChainResult<T> = Result<T, ChainError>;
