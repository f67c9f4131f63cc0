//! Connection pragmas and schema migrations.
//!
//! The schema version lives in `PRAGMA user_version`. Each migration runs in
//! its own transaction and bumps the version on commit.

use crate::config::StoreConfig;
use crate::error::StoreResult;
use evidence_core::EntryKind;
use rusqlite::Connection;

/// Row encoding written by this version: typed `{id, type}` relations
pub const ROW_SCHEMA_TYPED: i64 = 2;
/// Legacy row encoding: relations are bare ids meaning `derived_from`
pub const ROW_SCHEMA_LEGACY: i64 = 1;

type Migration = fn(&Connection) -> rusqlite::Result<()>;

const MIGRATIONS: [(u32, &str, Migration); 2] = [
    (1, "evidence_entries", v001_entries),
    (2, "relations_and_confidence", v002_relations),
];

/// Apply pragmas to the writer connection
///
/// # Errors
///
/// Returns error if a pragma cannot be set
pub fn apply_pragmas(conn: &Connection, config: &StoreConfig) -> StoreResult<()> {
    conn.execute_batch(&format!(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = {};
        PRAGMA wal_autocheckpoint = {};
        PRAGMA foreign_keys = ON;
        PRAGMA temp_store = MEMORY;
        ",
        config.synchronous.as_pragma(),
        config.wal_autocheckpoint,
    ))?;
    conn.busy_timeout(config.busy_timeout)?;
    Ok(())
}

/// Apply pragmas to a read-only connection
///
/// # Errors
///
/// Returns error if a pragma cannot be set
pub fn apply_read_pragmas(conn: &Connection, config: &StoreConfig) -> StoreResult<()> {
    conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
    conn.busy_timeout(config.busy_timeout)?;
    Ok(())
}

/// Whether the connection is in WAL mode
///
/// # Errors
///
/// Returns error if the pragma cannot be read
pub fn is_wal_mode(conn: &Connection) -> StoreResult<bool> {
    let mode: String = conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
    Ok(mode.eq_ignore_ascii_case("wal"))
}

/// Current schema version
///
/// # Errors
///
/// Returns error if the pragma cannot be read
pub fn schema_version(conn: &Connection) -> StoreResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Latest schema version known to this build
#[must_use]
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |(version, _, _)| *version)
}

/// Run every pending migration. Returns the resulting version.
///
/// # Errors
///
/// Returns error if a migration fails; that migration is rolled back
pub fn run_migrations(conn: &mut Connection) -> StoreResult<u32> {
    let mut current = schema_version(conn)?;
    for (version, name, migrate) in MIGRATIONS {
        if version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        migrate(&tx)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::info!(version, migration = name, "applied evidence schema migration");
        current = version;
    }
    Ok(current)
}

fn kind_check() -> String {
    EntryKind::ALL
        .iter()
        .map(|kind| format!("'{}'", kind.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn v001_entries(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS evidence_entries (
            id              TEXT PRIMARY KEY NOT NULL,
            timestamp       TEXT NOT NULL,
            kind            TEXT NOT NULL CHECK (kind IN ({kinds})),
            payload         TEXT NOT NULL,
            provenance      TEXT NOT NULL,
            confidence      TEXT,
            related_entries TEXT NOT NULL DEFAULT '[]',
            session_id      TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_evidence_timestamp ON evidence_entries(timestamp);
        CREATE INDEX IF NOT EXISTS idx_evidence_kind_timestamp ON evidence_entries(kind, timestamp);
        CREATE INDEX IF NOT EXISTS idx_evidence_session ON evidence_entries(session_id, timestamp);
        ",
        kinds = kind_check()
    ))
}

fn v002_relations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        ALTER TABLE evidence_entries ADD COLUMN schema_version INTEGER NOT NULL DEFAULT 1;
        ALTER TABLE evidence_entries ADD COLUMN confidence_value REAL;

        UPDATE evidence_entries
        SET confidence_value = CASE json_extract(confidence, '$.type')
            WHEN 'absent' THEN NULL
            WHEN 'bounded' THEN json_extract(confidence, '$.low')
            ELSE json_extract(confidence, '$.value')
        END
        WHERE confidence IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_evidence_confidence ON evidence_entries(confidence_value);

        CREATE TABLE IF NOT EXISTS evidence_relations (
            source_id TEXT NOT NULL REFERENCES evidence_entries(id),
            target_id TEXT NOT NULL,
            relation  TEXT NOT NULL,
            position  INTEGER NOT NULL,
            PRIMARY KEY (source_id, position)
        );

        CREATE INDEX IF NOT EXISTS idx_relations_target ON evidence_relations(target_id);

        INSERT OR IGNORE INTO evidence_relations (source_id, target_id, relation, position)
        SELECT e.id,
               CASE j.type WHEN 'text' THEN j.value ELSE json_extract(j.value, '$.id') END,
               CASE j.type WHEN 'text' THEN 'derived_from' ELSE json_extract(j.value, '$.type') END,
               j.key
        FROM evidence_entries e, json_each(e.related_entries) j;
        ",
    )
}
