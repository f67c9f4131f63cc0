//! Store configuration.

use evidence_policy::AttributionConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// SQLite `synchronous` level used with WAL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Sync at checkpoints. Committed transactions survive a process crash.
    #[default]
    Normal,
    /// Sync on every commit. Also survives power loss.
    Full,
}

impl SyncMode {
    /// Pragma value
    #[must_use]
    pub const fn as_pragma(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; `None` keeps everything in memory
    pub path: Option<PathBuf>,
    /// Bounded wait for the writer lock and the SQLite busy handler
    #[serde(with = "duration_ms", rename = "busy_timeout_ms")]
    pub busy_timeout: Duration,
    /// Sync level
    pub synchronous: SyncMode,
    /// WAL pages between automatic checkpoints
    pub wal_autocheckpoint: u32,
    /// Read connections for file-backed stores
    pub read_pool_size: usize,
    /// Agent attribution policy
    pub attribution: AttributionConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_secs(5),
            synchronous: SyncMode::Normal,
            wal_autocheckpoint: 1000,
            read_pool_size: 4,
            attribution: AttributionConfig::default(),
        }
    }
}

impl StoreConfig {
    /// In-memory store with default settings
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed store with default settings
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_synchronous(mut self, mode: SyncMode) -> Self {
        self.synchronous = mode;
        self
    }

    #[must_use]
    pub fn with_attribution(mut self, attribution: AttributionConfig) -> Self {
        self.attribution = attribution;
        self
    }

    /// Whether the store lives only in memory
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidence_policy::ViolationMode;

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert!(config.is_in_memory());
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
        assert_eq!(config.synchronous, SyncMode::Normal);
        assert_eq!(config.wal_autocheckpoint, 1000);
        assert_eq!(config.read_pool_size, 4);
    }

    #[test]
    fn test_config_from_json() {
        let config: StoreConfig = serde_json::from_str(
            r#"{
                "path": "/tmp/ledger.db",
                "busy_timeout_ms": 250,
                "synchronous": "full",
                "attribution": {"on_violation": "reject"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.path, Some(PathBuf::from("/tmp/ledger.db")));
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.synchronous.as_pragma(), "FULL");
        assert_eq!(config.attribution.on_violation, ViolationMode::Reject);
        assert_eq!(config.read_pool_size, 4);
    }
}
