//! Deterministic replay of a recorded session.
//!
//! Each entry is handed to an executor in session order. The canonical hash
//! of the executor's output is compared with the entry's recorded input
//! hash; divergences are reported, never raised.

use crate::error::ReplayError;
use crate::executor::ReplayExecutor;
use crate::report::{EntryReplayDetail, ReplayResult, ReplayStatus};
use crate::session::ReplaySession;
use evidence_core::{ContentHash, EvidenceDraft, EvidenceEntry, RelationType};
use evidence_storage::EvidenceStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Replay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayOptions {
    /// Compare output hashes against recorded input hashes
    pub verify_hashes: bool,
    /// Abort at the first mismatch or executor error
    pub stop_on_mismatch: bool,
    /// Append executor outputs to the store as a new session
    pub record_new_evidence: bool,
    /// Session id for recorded entries; generated when absent
    pub new_session_id: Option<String>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            verify_hashes: true,
            stop_on_mismatch: false,
            record_new_evidence: false,
            new_session_id: None,
        }
    }
}

impl ReplayOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn verify_hashes(mut self, verify: bool) -> Self {
        self.verify_hashes = verify;
        self
    }

    #[must_use]
    pub fn stop_on_mismatch(mut self, stop: bool) -> Self {
        self.stop_on_mismatch = stop;
        self
    }

    #[must_use]
    pub fn record_new_evidence(mut self, record: bool) -> Self {
        self.record_new_evidence = record;
        self
    }

    #[must_use]
    pub fn new_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.new_session_id = Some(session_id.into());
        self
    }
}

/// Reported after every processed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayProgress {
    /// Zero-based position of the entry just processed
    pub index: usize,
    pub total: usize,
    /// Whether the entry's output hash matched
    pub matched: bool,
    /// Time since the run started
    pub elapsed: Duration,
}

type ProgressCallback<'a> = Box<dyn FnMut(&ReplayProgress) + 'a>;

/// Re-executes sessions one entry at a time
pub struct ReplayEngine<'a> {
    options: ReplayOptions,
    store: Option<&'a EvidenceStore>,
    on_progress: Option<ProgressCallback<'a>>,
}

impl<'a> ReplayEngine<'a> {
    #[must_use]
    pub fn new(options: ReplayOptions) -> Self {
        Self {
            options,
            store: None,
            on_progress: None,
        }
    }

    /// Store that receives recorded entries
    #[must_use]
    pub fn with_store(mut self, store: &'a EvidenceStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&ReplayProgress) + 'a,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn options(&self) -> &ReplayOptions {
        &self.options
    }

    /// Replay `session` through `executor`.
    ///
    /// Mismatches and executor failures are findings in the returned result.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::RecordingWithoutStore`] if recording is enabled
    /// without a store
    pub fn replay<E>(
        &mut self,
        session: &ReplaySession,
        executor: &mut E,
    ) -> Result<ReplayResult, ReplayError>
    where
        E: ReplayExecutor + ?Sized,
    {
        let recorder = if self.options.record_new_evidence {
            let store = self.store.ok_or(ReplayError::RecordingWithoutStore)?;
            let session_id = self
                .options
                .new_session_id
                .clone()
                .unwrap_or_else(|| format!("replay_{}", Uuid::new_v4().simple()));
            Some((store, session_id))
        } else {
            None
        };

        let started = Instant::now();
        let total = session.len();
        let mut result = ReplayResult::new(session.session_id(), total);
        result.new_session_id = recorder.as_ref().map(|(_, id)| id.clone());

        tracing::info!(
            session = session.session_id(),
            entries = total,
            verify = self.options.verify_hashes,
            record = recorder.is_some(),
            "starting replay"
        );

        for (index, entry) in session.iter().enumerate() {
            let entry_started = Instant::now();
            let (status, output) = self.replay_entry(entry, executor);
            let output_hash = output.as_ref().map(|(_, hash)| hash.clone());
            let matched = status.is_match();
            let stop = self.options.stop_on_mismatch && (status.is_mismatch() || status.is_error());

            match &status {
                ReplayStatus::Mismatch { expected, actual } => {
                    tracing::warn!(entry = %entry.id, index, %expected, %actual, "replay mismatch");
                }
                ReplayStatus::Error { message } => {
                    tracing::warn!(entry = %entry.id, index, error = %message, "executor failed");
                }
                _ => {}
            }

            result.push(EntryReplayDetail {
                entry_id: entry.id.clone(),
                index,
                status,
                output_hash,
                elapsed: entry_started.elapsed(),
            });

            if !stop {
                if let (Some((store, session_id)), Some((output, hash))) = (&recorder, output) {
                    let draft = replayed_draft(entry, output, hash, session_id);
                    match store.append(draft) {
                        Ok(recorded) => result.recorded.push(recorded.id),
                        Err(err) => {
                            tracing::warn!(entry = %entry.id, error = %err, "failed to record replayed entry");
                            result.push_error(&entry.id, format!("record failed: {err}"));
                        }
                    }
                }
            }

            let progress = ReplayProgress {
                index,
                total,
                matched,
                elapsed: started.elapsed(),
            };
            tracing::debug!(index, total, matched, "replayed entry");
            if let Some(callback) = self.on_progress.as_mut() {
                callback(&progress);
            }

            if stop {
                result.aborted = true;
                break;
            }
        }

        result.finish(started.elapsed());
        tracing::info!(
            session = session.session_id(),
            processed = result.processed,
            matched = result.matched,
            mismatches = result.mismatches,
            errors = result.errors,
            aborted = result.aborted,
            success = result.success,
            "replay finished"
        );
        Ok(result)
    }

    /// Run the executor on one entry and classify its output
    fn replay_entry<E>(
        &self,
        entry: &EvidenceEntry,
        executor: &mut E,
    ) -> (ReplayStatus, Option<(Value, String)>)
    where
        E: ReplayExecutor + ?Sized,
    {
        let output = match catch_unwind(AssertUnwindSafe(|| executor.execute(entry))) {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return (
                    ReplayStatus::Error {
                        message: err.to_string(),
                    },
                    None,
                );
            }
            Err(panic) => {
                return (
                    ReplayStatus::Error {
                        message: format!("executor panicked: {}", panic_message(panic.as_ref())),
                    },
                    None,
                );
            }
        };

        let actual = match ContentHash::of_canonical(&output) {
            Ok(hash) => hash.to_hex(),
            Err(err) => {
                return (
                    ReplayStatus::Error {
                        message: format!("output hash: {err}"),
                    },
                    None,
                );
            }
        };

        let expected = entry
            .provenance
            .input_hash
            .as_deref()
            .filter(|hash| !hash.is_empty());

        let status = match expected {
            Some(expected) if self.options.verify_hashes => {
                if expected == actual {
                    ReplayStatus::Match
                } else {
                    ReplayStatus::Mismatch {
                        expected: expected.to_string(),
                        actual: actual.clone(),
                    }
                }
            }
            _ => ReplayStatus::Unverifiable,
        };
        (status, Some((output, actual)))
    }
}

impl std::fmt::Debug for ReplayEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("options", &self.options)
            .field("store", &self.store.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// The entry recorded for one replayed original
fn replayed_draft(
    original: &EvidenceEntry,
    output: Value,
    hash: String,
    session_id: &str,
) -> EvidenceDraft {
    let mut provenance = original.provenance.clone();
    provenance.method = format!("{}:replay", provenance.method);
    provenance.input_hash = Some(hash);

    let mut draft = EvidenceDraft::new(original.kind, output, provenance)
        .with_relation(original.id.clone(), RelationType::DerivedFrom)
        .with_session(session_id);
    if let Some(confidence) = original.confidence.clone() {
        draft = draft.with_confidence(confidence);
    }
    draft
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
