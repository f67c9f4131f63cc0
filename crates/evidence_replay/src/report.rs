//! Replay findings.

use evidence_core::EntryId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome for a single replayed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplayStatus {
    /// Output hash equals the recorded input hash
    Match,
    Mismatch { expected: String, actual: String },
    /// The executor failed or panicked
    Error { message: String },
    /// Nothing to compare against, or verification was off
    Unverifiable,
}

impl ReplayStatus {
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }

    #[must_use]
    pub const fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryReplayDetail {
    pub entry_id: EntryId,
    /// Position in session order
    pub index: usize,
    #[serde(flatten)]
    pub status: ReplayStatus,
    /// Hash of the executor output, when it produced one
    pub output_hash: Option<String>,
    pub elapsed: Duration,
}

/// One divergence, kept for the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchSummary {
    pub entry_id: EntryId,
    pub index: usize,
    pub expected: String,
    pub actual: String,
}

/// Aggregate result of one replay run.
///
/// An aborted run is still a well-formed result covering the entries
/// processed before the abort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayResult {
    pub session_id: String,
    pub total: usize,
    pub processed: usize,
    pub matched: usize,
    pub mismatches: usize,
    pub unverifiable: usize,
    pub errors: usize,
    pub details: Vec<EntryReplayDetail>,
    pub mismatch_summary: Vec<MismatchSummary>,
    /// Executor and recording failures, as `(entry, message)`
    pub error_messages: Vec<(EntryId, String)>,
    pub aborted: bool,
    pub new_session_id: Option<String>,
    pub recorded: Vec<EntryId>,
    pub elapsed: Duration,
    pub success: bool,
}

impl ReplayResult {
    pub(crate) fn new(session_id: &str, total: usize) -> Self {
        Self {
            session_id: session_id.to_string(),
            total,
            ..Self::default()
        }
    }

    pub(crate) fn push(&mut self, detail: EntryReplayDetail) {
        self.processed += 1;
        match &detail.status {
            ReplayStatus::Match => self.matched += 1,
            ReplayStatus::Mismatch { expected, actual } => {
                self.mismatches += 1;
                self.mismatch_summary.push(MismatchSummary {
                    entry_id: detail.entry_id.clone(),
                    index: detail.index,
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
            ReplayStatus::Error { message } => {
                self.errors += 1;
                self.error_messages
                    .push((detail.entry_id.clone(), message.clone()));
            }
            ReplayStatus::Unverifiable => self.unverifiable += 1,
        }
        self.details.push(detail);
    }

    /// Count a failure that happened after the entry's status was settled
    pub(crate) fn push_error(&mut self, entry_id: &EntryId, message: String) {
        self.errors += 1;
        self.error_messages.push((entry_id.clone(), message));
    }

    pub(crate) fn finish(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
        self.success = self.mismatches == 0 && self.errors == 0;
    }
}
