//! Mapping between evidence entries and table rows.

use crate::error::{StoreError, StoreResult};
use crate::schema::{ROW_SCHEMA_LEGACY, ROW_SCHEMA_TYPED};
use evidence_core::{
    ConfidenceValue, EntryId, EntryKind, EvidenceEntry, EvidenceRelation, Provenance, Timestamp,
};
use rusqlite::{Connection, Row, params};

/// Columns selected for every entry query, in decode order
pub const ENTRY_COLUMNS: &str = "id, timestamp, kind, payload, provenance, confidence, \
     related_entries, session_id, schema_version";

/// Insert one entry and its relation index rows
///
/// # Errors
///
/// Returns error on constraint violation (duplicate id, unknown kind) or
/// serialization failure
pub fn insert_entry(conn: &Connection, entry: &EvidenceEntry) -> StoreResult<()> {
    let confidence = entry
        .confidence
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO evidence_entries
            (id, timestamp, kind, payload, provenance, confidence, confidence_value,
             related_entries, session_id, schema_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.id.as_str(),
            entry.timestamp.to_canonical(),
            entry.kind.as_str(),
            serde_json::to_string(&entry.payload)?,
            serde_json::to_string(&entry.provenance)?,
            confidence,
            entry.confidence_scalar(),
            serde_json::to_string(&entry.related_entries)?,
            entry.session_id,
            ROW_SCHEMA_TYPED,
        ],
    )?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO evidence_relations (source_id, target_id, relation, position)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, relation) in entry.related_entries.iter().enumerate() {
        stmt.execute(params![
            entry.id.as_str(),
            relation.id.as_str(),
            relation.relation.as_str(),
            i64::try_from(position).unwrap_or(i64::MAX),
        ])?;
    }
    Ok(())
}

/// Decode a row selected with [`ENTRY_COLUMNS`]
///
/// # Errors
///
/// Returns [`StoreError::CorruptRow`] when a column does not decode
pub fn decode_entry(row: &Row<'_>) -> StoreResult<EvidenceEntry> {
    let id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let payload: String = row.get(3)?;
    let provenance: String = row.get(4)?;
    let confidence: Option<String> = row.get(5)?;
    let related: String = row.get(6)?;
    let session_id: Option<String> = row.get(7)?;
    let row_version: i64 = row.get(8)?;

    let corrupt = |reason: String| StoreError::CorruptRow {
        id: id.clone(),
        reason,
    };

    let timestamp =
        Timestamp::parse(&timestamp).map_err(|e| corrupt(format!("timestamp: {}", e)))?;
    let kind: EntryKind = kind.parse().map_err(|e| corrupt(format!("kind: {}", e)))?;
    let payload =
        serde_json::from_str(&payload).map_err(|e| corrupt(format!("payload: {}", e)))?;
    let provenance: Provenance =
        serde_json::from_str(&provenance).map_err(|e| corrupt(format!("provenance: {}", e)))?;
    let confidence: Option<ConfidenceValue> = confidence
        .map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(|e| corrupt(format!("confidence: {}", e)))?;
    let related_entries = decode_relations(&related, row_version).map_err(corrupt)?;

    Ok(EvidenceEntry {
        id: EntryId::from_raw(id.clone()),
        timestamp,
        kind,
        payload,
        provenance,
        confidence,
        related_entries,
        session_id,
    })
}

/// Decode `related_entries` in the shape its row version wrote
///
/// Version 1 rows hold bare ids, read as `derived_from`. Version 2 rows hold
/// typed relations. Any other version, or a shape that does not match the
/// version, is rejected.
fn decode_relations(text: &str, row_version: i64) -> Result<Vec<EvidenceRelation>, String> {
    match row_version {
        ROW_SCHEMA_LEGACY => serde_json::from_str::<Vec<EntryId>>(text)
            .map(|ids| ids.into_iter().map(EvidenceRelation::legacy).collect())
            .map_err(|e| format!("related_entries (v{row_version}): {e}")),
        ROW_SCHEMA_TYPED => serde_json::from_str::<Vec<EvidenceRelation>>(text)
            .map_err(|e| format!("related_entries (v{row_version}): {e}")),
        other => Err(format!("unknown row schema version {other}")),
    }
}

/// Fetch one entry by id
///
/// # Errors
///
/// Returns error if the query fails or the row is corrupt
pub fn get_entry(conn: &Connection, id: &str) -> StoreResult<Option<EvidenceEntry>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ENTRY_COLUMNS} FROM evidence_entries WHERE id = ?1"
    ))?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => decode_entry(row).map(Some),
        None => Ok(None),
    }
}

/// Run a prepared entry query and decode every row
///
/// # Errors
///
/// Returns error if the query fails or a row is corrupt
pub fn collect_entries(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> StoreResult<Vec<EvidenceEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(decode_entry(row)?);
    }
    Ok(entries)
}
