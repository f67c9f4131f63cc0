//! Content addressing for evidence entries.
//!
//! Entries are reduced to a canonical JSON form (object keys sorted
//! recursively, array order preserved, no insignificant whitespace) and hashed
//! with SHA-256. The hash depends only on the entry's content, never on the id
//! or timestamp assigned at append time.

use crate::entry::{EntryKind, EvidenceDraft, EvidenceEntry, EvidenceRelation, Provenance};
use crate::confidence::ConfidenceValue;
use crate::error::{CoreError, CoreResult};
use crate::id::EntryId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 content hash (256 bits / 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// The number of bytes in a hash
    pub const LEN: usize = 32;

    /// Number of hex characters kept in a content-addressable id
    pub const SHORT_HEX_LEN: usize = 16;

    /// Compute SHA-256 of raw bytes
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Create from bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex characters
    #[must_use]
    pub fn short_hex(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(Self::SHORT_HEX_LEN);
        hex
    }

    /// Parse from hex string
    ///
    /// # Errors
    ///
    /// Returns error if hex is invalid or not 32 bytes
    pub fn from_hex(hex: &str) -> CoreResult<Self> {
        let bytes = hex::decode(hex).map_err(|e| CoreError::InvalidHash {
            reason: e.to_string(),
        })?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| CoreError::InvalidHash {
            reason: format!("expected {} bytes, got {}", Self::LEN, bytes.len()),
        })?;
        Ok(Self(arr))
    }

    /// Hash any serializable value in canonical JSON form
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be represented as JSON
    pub fn of_canonical<T: Serialize + ?Sized>(value: &T) -> CoreResult<Self> {
        let canonical = canonical_json(value)?;
        Ok(Self::compute(canonical.as_bytes()))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Serialize a value to canonical JSON text.
///
/// # Errors
///
/// Returns error if the value cannot be represented as JSON
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> CoreResult<String> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

/// Recursively rebuild a JSON value with sorted object keys.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

// Keys are sorted here explicitly so the output does not depend on whether
// serde_json's map preserves insertion order.
fn write_canonical(value: &Value, out: &mut String) -> CoreResult<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// The content of an entry that participates in its hash
#[derive(Serialize)]
struct HashableContent<'a> {
    kind: EntryKind,
    payload: &'a Value,
    provenance: &'a Provenance,
    confidence: Option<&'a ConfidenceValue>,
    related_entries: &'a [EvidenceRelation],
    session_id: Option<&'a str>,
}

impl<'a> From<&'a EvidenceDraft> for HashableContent<'a> {
    fn from(draft: &'a EvidenceDraft) -> Self {
        Self {
            kind: draft.kind,
            payload: &draft.payload,
            provenance: &draft.provenance,
            confidence: draft.confidence.as_ref(),
            related_entries: &draft.related_entries,
            session_id: draft.session_id.as_deref(),
        }
    }
}

impl<'a> From<&'a EvidenceEntry> for HashableContent<'a> {
    fn from(entry: &'a EvidenceEntry) -> Self {
        Self {
            kind: entry.kind,
            payload: &entry.payload,
            provenance: &entry.provenance,
            confidence: entry.confidence.as_ref(),
            related_entries: &entry.related_entries,
            session_id: entry.session_id.as_deref(),
        }
    }
}

/// Compute the content hash of an entry that has not been assigned an id or
/// timestamp yet.
///
/// # Errors
///
/// Returns error if the payload cannot be encoded
pub fn compute_entry_hash(draft: &EvidenceDraft) -> CoreResult<ContentHash> {
    ContentHash::of_canonical(&HashableContent::from(draft))
}

/// Compute the content hash of a stored entry, ignoring its id and timestamp.
///
/// # Errors
///
/// Returns error if the payload cannot be encoded
pub fn compute_stored_entry_hash(entry: &EvidenceEntry) -> CoreResult<ContentHash> {
    ContentHash::of_canonical(&HashableContent::from(entry))
}

/// Derive the content-addressable id of an entry.
///
/// # Errors
///
/// Returns error if the payload cannot be encoded
pub fn content_addressable_id(draft: &EvidenceDraft) -> CoreResult<EntryId> {
    Ok(EntryId::content_addressed(&compute_entry_hash(draft)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ProvenanceSource, RelationType};
    use proptest::prelude::*;
    use serde_json::json;

    fn draft(payload: Value) -> EvidenceDraft {
        EvidenceDraft::new(
            EntryKind::Claim,
            payload,
            Provenance::new(ProvenanceSource::UserInput, "manual"),
        )
    }

    #[test]
    fn test_hash_compute() {
        let hash = ContentHash::compute(b"hello world");
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(
            hash.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_hash_from_to_hex() {
        let hash = ContentHash::compute(b"test");
        let restored = ContentHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, restored);
        assert!(ContentHash::from_hex("abcd").is_err());
        assert!(ContentHash::from_hex("zz").is_err());
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": {"d": [3, {"z": 1, "y": 2}], "c": null}});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"a":{"c":null,"d":[3,{"y":2,"z":1}]},"b":1}"#
        );
    }

    #[test]
    fn test_canonical_preserves_array_order() {
        let a = canonical_json(&json!([1, 2, 3])).unwrap();
        let b = canonical_json(&json!([3, 2, 1])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_canonicalize_matches_canonical_json() {
        let value = json!({"outer": {"b": true, "a": "x"}});
        let rebuilt = canonicalize(&value);
        assert_eq!(
            canonical_json(&rebuilt).unwrap(),
            canonical_json(&value).unwrap()
        );
    }

    #[test]
    fn test_entry_hash_ignores_key_order() {
        let a = draft(json!({"claim": "x", "meta": {"k1": 1, "k2": 2}}));
        let b = draft(json!({"meta": {"k2": 2, "k1": 1}, "claim": "x"}));
        assert_eq!(compute_entry_hash(&a).unwrap(), compute_entry_hash(&b).unwrap());
    }

    #[test]
    fn test_entry_hash_covers_relations_and_session() {
        let base = draft(json!({"claim": "x"}));
        let with_session = base.clone().with_session("s1");
        let with_relation = base
            .clone()
            .with_relation(EntryId::from_raw("ev_a"), RelationType::Supports);
        let h = compute_entry_hash(&base).unwrap();
        assert_ne!(h, compute_entry_hash(&with_session).unwrap());
        assert_ne!(h, compute_entry_hash(&with_relation).unwrap());
    }

    #[test]
    fn test_content_addressable_id_prefix() {
        let d = draft(json!({"claim": "x"}));
        let id = content_addressable_id(&d).unwrap();
        let hash = compute_entry_hash(&d).unwrap();
        assert_eq!(
            id.as_str(),
            format!("{}{}", EntryId::CONTENT_PREFIX, hash.short_hex())
        );
        assert!(id.is_content_addressed());
    }

    #[test]
    fn test_content_hash_serde_as_hex() {
        let hash = ContentHash::compute(b"x");
        let encoded = serde_json::to_string(&hash).unwrap();
        assert_eq!(encoded, format!("\"{}\"", hash.to_hex()));
        let decoded: ContentHash = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, hash);
    }

    fn shuffle_keys(value: &Value, seed: u64) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                let n = entries.len();
                if n > 1 {
                    entries.rotate_left((seed as usize) % n);
                }
                if seed % 2 == 1 {
                    entries.reverse();
                }
                let mut out = serde_json::Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), shuffle_keys(v, seed / 2 + 1));
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| shuffle_keys(v, seed + 3)).collect())
            }
            other => other.clone(),
        }
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-z]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_hash_is_key_order_independent(payload in arb_json(), seed in 0u64..64) {
            let a = draft(payload.clone());
            let b = draft(shuffle_keys(&payload, seed));
            prop_assert_eq!(compute_entry_hash(&a).unwrap(), compute_entry_hash(&b).unwrap());
        }

        #[test]
        fn prop_hash_is_deterministic(payload in arb_json()) {
            let d = draft(payload);
            prop_assert_eq!(compute_entry_hash(&d).unwrap(), compute_entry_hash(&d).unwrap());
        }
    }
}
