//! Identifiers for evidence entries.
//!
//! Two id forms coexist in one store: random ids (`ev_` + UUID v4) assigned by
//! default, and content-addressable ids (`evc_` + 16 hex chars of the entry's
//! content hash) assigned on request.

use crate::error::{CoreError, CoreResult};
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entry identifier - unique for the lifetime of a store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Prefix of randomly assigned ids
    pub const RANDOM_PREFIX: &'static str = "ev_";

    /// Prefix of content-addressable ids
    pub const CONTENT_PREFIX: &'static str = "evc_";

    /// Create a new random EntryId
    #[must_use]
    pub fn random() -> Self {
        Self(format!("{}{}", Self::RANDOM_PREFIX, Uuid::new_v4()))
    }

    /// Create the content-addressable id for a hash
    #[must_use]
    pub fn content_addressed(hash: &ContentHash) -> Self {
        Self(format!("{}{}", Self::CONTENT_PREFIX, hash.short_hex()))
    }

    /// Wrap an id read from storage or supplied by a caller, without checks
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Parse a caller-supplied id
    ///
    /// # Errors
    ///
    /// Returns error if the id is empty or contains whitespace
    pub fn parse(raw: &str) -> CoreResult<Self> {
        if raw.is_empty() {
            return Err(CoreError::InvalidId {
                reason: "id must not be empty".to_string(),
            });
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidId {
                reason: format!("id contains whitespace: {:?}", raw),
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Get as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id was derived from content
    #[must_use]
    pub fn is_content_addressed(&self) -> bool {
        self.0.starts_with(Self::CONTENT_PREFIX)
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for EntryId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntryId {
    fn from(raw: &str) -> Self {
        Self::from_raw(raw)
    }
}
