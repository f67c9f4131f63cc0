//! In-process fan-out of appended entries.
//!
//! Subscribers run synchronously on the appending thread, in registration
//! order, after the write has committed. Their errors and panics are logged
//! and discarded.

use evidence_core::{EntryKind, EvidenceEntry};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Error type subscribers may return
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// What a subscriber returns
pub type SubscriberResult = Result<(), SubscriberError>;

type Callback = Arc<dyn Fn(&EvidenceEntry) -> SubscriberResult + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Which entries a subscriber receives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Accepted kinds; empty accepts all
    pub kinds: Vec<EntryKind>,
    /// Only entries of this session
    pub session_id: Option<String>,
}

impl SubscriptionFilter {
    /// Accept everything
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kinds(kinds: impl IntoIterator<Item = EntryKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            session_id: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Whether `entry` passes this filter
    #[must_use]
    pub fn matches(&self, entry: &EvidenceEntry) -> bool {
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&entry.kind);
        let session_ok = self
            .session_id
            .as_ref()
            .is_none_or(|session| entry.session_id.as_ref() == Some(session));
        kind_ok && session_ok
    }
}

/// Registry of subscribers owned by one store
#[derive(Default)]
pub struct SubscriptionBus {
    next_id: AtomicU64,
    subscribers: RwLock<IndexMap<SubscriptionId, (SubscriptionFilter, Callback)>>,
}

impl SubscriptionBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    pub fn subscribe<F>(&self, filter: SubscriptionFilter, callback: F) -> SubscriptionId
    where
        F: Fn(&EvidenceEntry) -> SubscriberResult + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .insert(id, (filter, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.write().shift_remove(&id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Deliver `entry` to every matching subscriber.
    ///
    /// Returns how many subscribers completed without error.
    pub fn publish(&self, entry: &EvidenceEntry) -> usize {
        // Snapshot so callbacks may (un)subscribe without deadlocking
        let targets: Vec<(SubscriptionId, Callback)> = self
            .subscribers
            .read()
            .iter()
            .filter(|(_, (filter, _))| filter.matches(entry))
            .map(|(id, (_, callback))| (*id, Arc::clone(callback)))
            .collect();

        let mut delivered = 0;
        for (id, callback) in targets {
            match catch_unwind(AssertUnwindSafe(|| callback(entry))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    tracing::warn!(subscription = %id, entry = %entry.id, error = %err, "subscriber failed");
                }
                Err(_) => {
                    tracing::warn!(subscription = %id, entry = %entry.id, "subscriber panicked");
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for SubscriptionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBus")
            .field("subscribers", &self.len())
            .finish()
    }
}
