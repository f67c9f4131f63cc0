//! Replay errors.
//!
//! Divergences found while replaying are findings in the report, not errors.
//! These cover misuse and storage failures only.

use evidence_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Recording was requested but the engine has no store to write to
    #[error("record_new_evidence requires a store: call ReplayEngine::with_store")]
    RecordingWithoutStore,
}
