//! Executors re-run recorded entries.

use evidence_core::EvidenceEntry;
use serde_json::Value;
use thiserror::Error;

/// Failure reported by an executor for one entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutorError {
    message: String,
}

impl ExecutorError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ExecutorError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ExecutorError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Recomputes the result of one recorded entry.
///
/// Called once per entry, in session order, never concurrently.
pub trait ReplayExecutor {
    /// Produce a fresh result for `entry`
    ///
    /// # Errors
    ///
    /// Returns error if the entry cannot be re-executed
    fn execute(&mut self, entry: &EvidenceEntry) -> Result<Value, ExecutorError>;
}

impl<F> ReplayExecutor for F
where
    F: FnMut(&EvidenceEntry) -> Result<Value, ExecutorError>,
{
    fn execute(&mut self, entry: &EvidenceEntry) -> Result<Value, ExecutorError> {
        self(entry)
    }
}

/// Returns each entry's payload unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadEcho;

impl ReplayExecutor for PayloadEcho {
    fn execute(&mut self, entry: &EvidenceEntry) -> Result<Value, ExecutorError> {
        Ok(entry.payload.clone())
    }
}
