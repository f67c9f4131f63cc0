//! The durable evidence store.
//!
//! One writer connection guarded by a mutex with a bounded wait, plus a pool
//! of read-only connections when the store is file-backed. In-memory stores
//! route reads through the writer, since a second in-memory connection would
//! be a separate database.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::pool::ReadPool;
use crate::query::EvidenceQuery;
use crate::row::{ENTRY_COLUMNS, collect_entries, get_entry, insert_entry};
use crate::schema::{apply_pragmas, is_wal_mode, run_migrations};
use crate::subscription::{SubscriberResult, SubscriptionBus, SubscriptionFilter, SubscriptionId};
use evidence_chain::{ChainBuilder, ChainOptions, EvidenceChain, EvidenceSource};
use evidence_core::{
    CoreError, EntryId, EntryKind, EvidenceDraft, EvidenceEntry, Timestamp,
    content_addressable_id,
};
use evidence_policy::{AttributionGuard, AttributionWarning};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, TransactionBehavior, params};
use rusqlite::types::ToSql;

/// Upper bound on ids bound into one `IN (...)` list
const MAX_BOUND_IDS: usize = 500;

struct Connections {
    writer: Mutex<Connection>,
    readers: Option<ReadPool>,
}

/// Append-only evidence log
pub struct EvidenceStore {
    config: StoreConfig,
    connections: RwLock<Option<Connections>>,
    attribution: AttributionGuard,
    subscriptions: SubscriptionBus,
}

impl EvidenceStore {
    /// Create an uninitialized store
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let attribution = AttributionGuard::new(config.attribution);
        Self {
            config,
            connections: RwLock::new(None),
            attribution,
            subscriptions: SubscriptionBus::new(),
        }
    }

    /// Create and initialize
    ///
    /// # Errors
    ///
    /// See [`EvidenceStore::initialize`]
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let store = Self::new(config);
        store.initialize()?;
        Ok(store)
    }

    /// In-memory store with default configuration
    ///
    /// # Errors
    ///
    /// See [`EvidenceStore::initialize`]
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    /// Open connections, apply pragmas and migrate. No-op when ready.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated
    pub fn initialize(&self) -> StoreResult<()> {
        let mut slot = self.connections.write();
        if slot.is_some() {
            return Ok(());
        }

        let mut writer = match &self.config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        apply_pragmas(&writer, &self.config)?;
        let version = run_migrations(&mut writer)?;

        let readers = match &self.config.path {
            Some(path) => Some(ReadPool::open(path, &self.config)?),
            None => None,
        };

        tracing::info!(
            path = ?self.config.path,
            schema_version = version,
            wal = is_wal_mode(&writer)?,
            readers = readers.as_ref().map_or(0, ReadPool::size),
            "evidence store opened"
        );

        *slot = Some(Connections {
            writer: Mutex::new(writer),
            readers,
        });
        Ok(())
    }

    /// Checkpoint the WAL and drop every connection. No-op when closed.
    ///
    /// # Errors
    ///
    /// Returns error if the final checkpoint fails
    pub fn close(&self) -> StoreResult<()> {
        let Some(connections) = self.connections.write().take() else {
            return Ok(());
        };
        drop(connections.readers);
        let writer = connections.writer.into_inner();
        if self.config.path.is_some() {
            writer.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        writer.close().map_err(|(_, err)| StoreError::Sqlite(err))?;
        tracing::info!(path = ?self.config.path, "evidence store closed");
        Ok(())
    }

    /// Whether the store is initialized and not closed
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.connections.read().is_some()
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn with_writer<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let slot = self.connections.read();
        let connections = slot.as_ref().ok_or(StoreError::NotReady)?;
        let mut writer = connections
            .writer
            .try_lock_for(self.config.busy_timeout)
            .ok_or(StoreError::Busy {
                waited: self.config.busy_timeout,
            })?;
        f(&mut *writer)
    }

    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let slot = self.connections.read();
        let connections = slot.as_ref().ok_or(StoreError::NotReady)?;
        match &connections.readers {
            Some(pool) => pool.with_conn(f),
            None => {
                let writer = connections
                    .writer
                    .try_lock_for(self.config.busy_timeout)
                    .ok_or(StoreError::Busy {
                        waited: self.config.busy_timeout,
                    })?;
                f(&*writer)
            }
        }
    }

    fn ensure_ready(&self) -> StoreResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(StoreError::NotReady)
        }
    }

    /// Append one entry with a fresh random id
    ///
    /// # Errors
    ///
    /// Returns error if the store is not ready, the draft is invalid, the
    /// attribution policy rejects it, or the write fails
    pub fn append(&self, draft: EvidenceDraft) -> StoreResult<EvidenceEntry> {
        self.ensure_ready()?;
        draft.validate()?;
        self.attribution.check(&draft)?;

        // Stamped under the writer lock so commit order follows timestamp order
        let entry = self.with_writer(|conn| {
            let entry = draft.into_entry(EntryId::random(), Timestamp::now_monotonic());
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            insert_entry(&tx, &entry)?;
            tx.commit()?;
            Ok(entry)
        })?;

        tracing::debug!(id = %entry.id, kind = %entry.kind, "appended evidence");
        self.subscriptions.publish(&entry);
        Ok(entry)
    }

    /// Append every draft in one transaction: all persist or none do
    ///
    /// # Errors
    ///
    /// Returns the first validation, attribution or write error; nothing
    /// from the batch is persisted in that case
    pub fn append_batch(&self, drafts: Vec<EvidenceDraft>) -> StoreResult<Vec<EvidenceEntry>> {
        self.ensure_ready()?;
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        for draft in &drafts {
            draft.validate()?;
        }
        self.attribution.check_all(&drafts)?;

        let entries = self.with_writer(|conn| {
            let entries: Vec<EvidenceEntry> = drafts
                .into_iter()
                .map(|draft| draft.into_entry(EntryId::random(), Timestamp::now_monotonic()))
                .collect();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for entry in &entries {
                insert_entry(&tx, entry)?;
            }
            tx.commit()?;
            Ok(entries)
        })?;

        tracing::debug!(count = entries.len(), "appended evidence batch");
        for entry in &entries {
            self.subscriptions.publish(entry);
        }
        Ok(entries)
    }

    /// Validate a draft for content addressing and derive its id
    fn content_id(draft: &EvidenceDraft) -> StoreResult<EntryId> {
        draft.validate()?;
        let id = content_addressable_id(draft)?;
        if draft.related_entries.iter().any(|relation| relation.id == id) {
            return Err(CoreError::validation(
                "related_entries",
                format!("entry may not relate to its own content id {}", id),
            )
            .into());
        }
        Ok(id)
    }

    /// Append under the content-addressable id of the draft.
    ///
    /// If an entry with that id already exists it is returned unchanged and
    /// subscribers are not notified.
    ///
    /// # Errors
    ///
    /// As [`EvidenceStore::append`]; also rejects drafts relating to their
    /// own content id
    pub fn append_content_addressed(&self, draft: EvidenceDraft) -> StoreResult<EvidenceEntry> {
        self.ensure_ready()?;
        let id = Self::content_id(&draft)?;
        self.attribution.check(&draft)?;

        let (entry, inserted) = self.with_writer(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(existing) = get_entry(&tx, id.as_str())? {
                return Ok((existing, false));
            }
            let entry = draft.into_entry(id, Timestamp::now_monotonic());
            insert_entry(&tx, &entry)?;
            tx.commit()?;
            Ok((entry, true))
        })?;

        if inserted {
            tracing::debug!(id = %entry.id, kind = %entry.kind, "appended content-addressed evidence");
            self.subscriptions.publish(&entry);
        } else {
            tracing::debug!(id = %entry.id, "content-addressed evidence already present");
        }
        Ok(entry)
    }

    /// Content-addressed append of a whole batch in one transaction.
    ///
    /// Returns one entry per draft, in input order. Drafts whose id is
    /// already stored, or repeated earlier in the batch, resolve to the stored
    /// entry. Only newly written entries reach subscribers.
    ///
    /// # Errors
    ///
    /// As [`EvidenceStore::append_content_addressed`] for any draft; nothing
    /// from the batch is persisted in that case
    pub fn append_batch_content_addressed(
        &self,
        drafts: Vec<EvidenceDraft>,
    ) -> StoreResult<Vec<EvidenceEntry>> {
        self.ensure_ready()?;
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        let ids = drafts
            .iter()
            .map(Self::content_id)
            .collect::<StoreResult<Vec<EntryId>>>()?;
        self.attribution.check_all(&drafts)?;

        let (entries, inserted) = self.with_writer(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut entries = Vec::with_capacity(drafts.len());
            let mut inserted = Vec::new();
            for (id, draft) in ids.into_iter().zip(drafts) {
                match get_entry(&tx, id.as_str())? {
                    Some(existing) => entries.push(existing),
                    None => {
                        let entry = draft.into_entry(id, Timestamp::now_monotonic());
                        insert_entry(&tx, &entry)?;
                        inserted.push(entries.len());
                        entries.push(entry);
                    }
                }
            }
            tx.commit()?;
            Ok((entries, inserted))
        })?;

        tracing::debug!(
            count = entries.len(),
            inserted = inserted.len(),
            "appended content-addressed evidence batch"
        );
        for index in inserted {
            self.subscriptions.publish(&entries[index]);
        }
        Ok(entries)
    }

    /// Fetch one entry
    ///
    /// # Errors
    ///
    /// Returns error if the store is not ready or the read fails
    pub fn get(&self, id: &EntryId) -> StoreResult<Option<EvidenceEntry>> {
        self.with_reader(|conn| get_entry(conn, id.as_str()))
    }

    /// Entries matching `query`
    ///
    /// # Errors
    ///
    /// Returns error if the store is not ready or the read fails
    pub fn query(&self, query: &EvidenceQuery) -> StoreResult<Vec<EvidenceEntry>> {
        let (sql, params) = query.select_sql();
        self.with_reader(|conn| collect_entries(conn, &sql, &as_refs(&params)))
    }

    /// Number of entries matching `query`, ignoring pagination
    ///
    /// # Errors
    ///
    /// Returns error if the store is not ready or the read fails
    pub fn count(&self, query: &EvidenceQuery) -> StoreResult<u64> {
        let (sql, params) = query.count_sql();
        self.with_reader(|conn| {
            let count: i64 = conn.query_row(&sql, &*as_refs(&params), |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    /// Every entry of a session, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the store is not ready or the read fails
    pub fn get_session_entries(&self, session_id: &str) -> StoreResult<Vec<EvidenceEntry>> {
        self.with_reader(|conn| {
            collect_entries(
                conn,
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM evidence_entries
                     WHERE session_id = ?1 ORDER BY timestamp ASC, rowid ASC"
                ),
                params![session_id],
            )
        })
    }

    /// Newest `limit` entries of one kind
    ///
    /// # Errors
    ///
    /// Returns error if the store is not ready or the read fails
    pub fn recent_of_kind(&self, kind: EntryKind, limit: usize) -> StoreResult<Vec<EvidenceEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_reader(|conn| {
            collect_entries(
                conn,
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM evidence_entries INDEXED BY idx_evidence_kind_timestamp
                     WHERE kind = ?1 ORDER BY timestamp DESC LIMIT ?2"
                ),
                params![kind.as_str(), limit],
            )
        })
    }

    /// Entries declaring a relation to any of `targets`, oldest first,
    /// optionally restricted to one kind
    ///
    /// # Errors
    ///
    /// Returns error if the store is not ready or the read fails
    pub fn referencing(
        &self,
        targets: &[EntryId],
        kind: Option<EntryKind>,
    ) -> StoreResult<Vec<EvidenceEntry>> {
        let mut found: IndexMap<EntryId, EvidenceEntry> = IndexMap::new();
        for chunk in targets.chunks(MAX_BOUND_IDS) {
            let mut params: Vec<Box<dyn ToSql>> = chunk
                .iter()
                .map(|id| Box::new(id.as_str().to_string()) as Box<dyn ToSql>)
                .collect();
            let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
            let mut sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM evidence_entries
                 WHERE id IN (SELECT source_id FROM evidence_relations WHERE target_id IN ({}))",
                placeholders.join(", ")
            );
            if let Some(kind) = kind {
                params.push(Box::new(kind.as_str()));
                sql.push_str(&format!(" AND kind = ?{}", params.len()));
            }
            sql.push_str(" ORDER BY timestamp ASC, rowid ASC");

            for entry in self.with_reader(|conn| collect_entries(conn, &sql, &as_refs(&params)))? {
                found.entry(entry.id.clone()).or_insert(entry);
            }
        }

        let mut entries: Vec<EvidenceEntry> = found.into_values().collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Distinct session ids, in order of first appearance
    ///
    /// # Errors
    ///
    /// Returns error if the store is not ready or the read fails
    pub fn session_ids(&self) -> StoreResult<Vec<String>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id FROM evidence_entries
                 WHERE session_id IS NOT NULL
                 GROUP BY session_id ORDER BY MIN(timestamp) ASC",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(ids)
        })
    }

    /// Reconstruct the chain rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown root
    pub fn get_chain(&self, root: &EntryId, options: &ChainOptions) -> StoreResult<EvidenceChain> {
        ChainBuilder::new(self)
            .with_options(options.clone())
            .build(root)
    }

    /// Register a subscriber for future appends
    pub fn subscribe<F>(&self, filter: SubscriptionFilter, callback: F) -> SubscriptionId
    where
        F: Fn(&EvidenceEntry) -> SubscriberResult + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(filter, callback)
    }

    /// Remove a subscriber
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Attribution warnings recorded so far
    #[must_use]
    pub fn attribution_warnings(&self) -> Vec<AttributionWarning> {
        self.attribution.warnings()
    }

    /// Drain recorded attribution warnings
    pub fn take_attribution_warnings(&self) -> Vec<AttributionWarning> {
        self.attribution.take_warnings()
    }
}

impl EvidenceSource for EvidenceStore {
    type Error = StoreError;

    fn fetch(&self, id: &EntryId) -> Result<Option<EvidenceEntry>, Self::Error> {
        self.get(id)
    }

    fn contradictions_referencing(
        &self,
        ids: &[EntryId],
    ) -> Result<Vec<EvidenceEntry>, Self::Error> {
        self.referencing(ids, Some(EntryKind::Contradiction))
    }
}

impl std::fmt::Debug for EvidenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceStore")
            .field("path", &self.config.path)
            .field("ready", &self.is_ready())
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

impl Drop for EvidenceStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to close evidence store cleanly");
        }
    }
}

fn as_refs(params: &[Box<dyn ToSql>]) -> Vec<&dyn ToSql> {
    params.iter().map(AsRef::as_ref).collect()
}
