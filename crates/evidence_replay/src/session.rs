//! Replay sessions: the frozen, ordered entries of one session.

use crate::error::ReplayError;
use evidence_core::{EntryId, EntryKind, EvidenceEntry, Timestamp};
use evidence_storage::EvidenceStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every entry of one session, ordered by timestamp ascending.
///
/// The order is fixed at construction and is the canonical execution order
/// used by replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySession {
    session_id: String,
    entries: Vec<EvidenceEntry>,
}

/// Outcome of [`ReplaySession::verify_integrity`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Entries that declare an input hash
    pub checked: usize,
    /// Entries whose declared input hash is empty
    pub empty_input_hashes: Vec<EntryId>,
    /// Entries whose session id differs from the session's
    pub foreign_entries: Vec<EntryId>,
}

impl IntegrityReport {
    /// No problems found
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.empty_input_hashes.is_empty() && self.foreign_entries.is_empty()
    }
}

impl ReplaySession {
    /// Load a session from the store
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn from_session_id(store: &EvidenceStore, session_id: &str) -> Result<Self, ReplayError> {
        let entries = store.get_session_entries(session_id)?;
        tracing::debug!(session = session_id, entries = entries.len(), "loaded replay session");
        Ok(Self::from_entries(session_id, entries))
    }

    /// Build a session from already loaded entries, sorting them by time
    #[must_use]
    pub fn from_entries(session_id: impl Into<String>, mut entries: Vec<EvidenceEntry>) -> Self {
        entries.sort_by_key(|entry| entry.timestamp);
        Self {
            session_id: session_id.into(),
            entries,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn entries(&self) -> &[EvidenceEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&EvidenceEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EvidenceEntry> {
        self.entries.iter()
    }

    /// Entry count per kind
    #[must_use]
    pub fn kind_counts(&self) -> BTreeMap<EntryKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.kind).or_insert(0) += 1;
        }
        counts
    }

    /// First and last timestamp
    #[must_use]
    pub fn time_span(&self) -> Option<(Timestamp, Timestamp)> {
        Some((self.entries.first()?.timestamp, self.entries.last()?.timestamp))
    }

    /// Scan for declared-but-empty input hashes and entries from another
    /// session. Does not recompute any hash.
    #[must_use]
    pub fn verify_integrity(&self) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        for entry in &self.entries {
            if let Some(hash) = &entry.provenance.input_hash {
                report.checked += 1;
                if hash.trim().is_empty() {
                    report.empty_input_hashes.push(entry.id.clone());
                }
            }
            if entry.session_id.as_deref() != Some(self.session_id.as_str()) {
                report.foreign_entries.push(entry.id.clone());
            }
        }
        report
    }
}

impl<'a> IntoIterator for &'a ReplaySession {
    type Item = &'a EvidenceEntry;
    type IntoIter = std::slice::Iter<'a, EvidenceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidence_core::{EvidenceDraft, Provenance, ProvenanceSource};
    use serde_json::json;

    fn entry(kind: EntryKind, micros: i64, session: &str) -> EvidenceEntry {
        EvidenceDraft::new(
            kind,
            json!({"at": micros}),
            Provenance::new(ProvenanceSource::ToolOutput, "run"),
        )
        .with_session(session)
        .into_entry(EntryId::random(), Timestamp::from_micros(micros))
    }

    #[test]
    fn test_from_entries_sorts() {
        let session = ReplaySession::from_entries(
            "s",
            vec![
                entry(EntryKind::Outcome, 30, "s"),
                entry(EntryKind::ToolCall, 10, "s"),
                entry(EntryKind::ToolCall, 20, "s"),
            ],
        );
        let times: Vec<i64> = session.iter().map(|e| e.timestamp.as_micros()).collect();
        assert_eq!(times, vec![10, 20, 30]);
        assert_eq!(
            session.time_span(),
            Some((Timestamp::from_micros(10), Timestamp::from_micros(30)))
        );
        assert_eq!(session.kind_counts()[&EntryKind::ToolCall], 2);
        assert_eq!(session.get(2).unwrap().kind, EntryKind::Outcome);
    }

    #[test]
    fn test_empty_session() {
        let session = ReplaySession::from_entries("s", Vec::new());
        assert!(session.is_empty());
        assert_eq!(session.time_span(), None);
        assert!(session.verify_integrity().is_clean());
    }

    #[test]
    fn test_integrity_flags() {
        let mut hashed = entry(EntryKind::ToolCall, 1, "s");
        hashed.provenance.input_hash = Some("abc123".to_string());
        let mut empty = entry(EntryKind::ToolCall, 2, "s");
        empty.provenance.input_hash = Some(String::new());
        let foreign = entry(EntryKind::ToolCall, 3, "other");

        let session =
            ReplaySession::from_entries("s", vec![hashed, empty.clone(), foreign.clone()]);
        let report = session.verify_integrity();
        assert_eq!(report.checked, 2);
        assert_eq!(report.empty_input_hashes, vec![empty.id]);
        assert_eq!(report.foreign_entries, vec![foreign.id]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_from_store() {
        let store = EvidenceStore::open_in_memory().unwrap();
        let draft = |n: i32| {
            EvidenceDraft::new(
                EntryKind::Claim,
                json!({"n": n}),
                Provenance::new(ProvenanceSource::UserInput, "manual"),
            )
        };
        store.append(draft(1).with_session("s1")).unwrap();
        store.append(draft(2).with_session("s2")).unwrap();
        store.append(draft(3).with_session("s1")).unwrap();

        let session = ReplaySession::from_session_id(&store, "s1").unwrap();
        assert_eq!(session.session_id(), "s1");
        let payloads: Vec<_> = session.iter().map(|e| e.payload["n"].clone()).collect();
        assert_eq!(payloads, vec![json!(1), json!(3)]);
    }
}
