//! Where the chain builder reads entries from.

use crate::error::ChainError;
use evidence_core::{EntryId, EvidenceEntry};
use indexmap::IndexMap;

/// Read access to stored evidence
pub trait EvidenceSource {
    /// Source-specific error; must be able to carry chain errors
    type Error: From<ChainError>;

    /// Fetch one entry by id
    ///
    /// # Errors
    ///
    /// Returns error if the underlying source fails. A missing entry is
    /// `Ok(None)`.
    fn fetch(&self, id: &EntryId) -> Result<Option<EvidenceEntry>, Self::Error>;

    /// Contradiction entries that declare a relation to any of `ids`
    ///
    /// # Errors
    ///
    /// Returns error if the underlying source fails
    fn contradictions_referencing(
        &self,
        ids: &[EntryId],
    ) -> Result<Vec<EvidenceEntry>, Self::Error>;
}

/// Entries held in memory, in insertion order
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    entries: IndexMap<EntryId, EvidenceEntry>,
}

impl InMemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, entry: EvidenceEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<EvidenceEntry> for InMemorySource {
    fn from_iter<I: IntoIterator<Item = EvidenceEntry>>(iter: I) -> Self {
        let mut source = Self::new();
        for entry in iter {
            source.insert(entry);
        }
        source
    }
}

impl EvidenceSource for InMemorySource {
    type Error = ChainError;

    fn fetch(&self, id: &EntryId) -> Result<Option<EvidenceEntry>, Self::Error> {
        Ok(self.entries.get(id).cloned())
    }

    fn contradictions_referencing(
        &self,
        ids: &[EntryId],
    ) -> Result<Vec<EvidenceEntry>, Self::Error> {
        Ok(self
            .entries
            .values()
            .filter(|entry| entry.is_contradiction())
            .filter(|entry| ids.iter().any(|id| entry.relates_to(id)))
            .cloned()
            .collect())
    }
}
