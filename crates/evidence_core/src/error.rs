//! Core error types for the evidence ledger.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid canonical encoding
    #[error("Invalid encoding: {reason}")]
    InvalidEncoding {
        /// Underlying encoder message
        reason: String,
    },

    /// Invalid hash format
    #[error("Invalid hash: {reason}")]
    InvalidHash {
        /// Why the hash was rejected
        reason: String,
    },

    /// Invalid ID format
    #[error("Invalid ID: {reason}")]
    InvalidId {
        /// Why the id was rejected
        reason: String,
    },

    /// Invalid timestamp
    #[error("Invalid timestamp: {reason}")]
    InvalidTimestamp {
        /// Why the timestamp was rejected
        reason: String,
    },

    /// Value outside the closed set of entry kinds
    #[error("Unknown entry kind: {value}")]
    UnknownKind {
        /// Offending value
        value: String,
    },

    /// Parse error
    #[error("Parse error: {message}")]
    ParseError {
        /// Parser message
        message: String,
    },

    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// Why validation failed
        reason: String,
    },
}

impl CoreError {
    /// Shorthand for a validation failure on a field
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}
