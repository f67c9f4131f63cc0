//! Evidence Ledger Core Types
//!
//! This crate contains pure types and logic with no I/O: the evidence entry
//! model, confidence values, identifiers, timestamps and content addressing.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod confidence;
pub mod entry;
pub mod error;
pub mod hash;
pub mod id;
pub mod time;

// Re-exports
pub use confidence::{AbsentReason, ConfidenceInput, ConfidenceValue};
pub use entry::{
    AgentIdentity, EntryKind, EvidenceDraft, EvidenceEntry, EvidenceRelation, Provenance,
    ProvenanceSource, RelationType,
};
pub use error::{CoreError, CoreResult};
pub use hash::{
    ContentHash, canonical_json, canonicalize, compute_entry_hash, compute_stored_entry_hash,
    content_addressable_id,
};
pub use id::EntryId;
pub use time::Timestamp;
