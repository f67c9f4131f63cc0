//! Query criteria and their SQL translation.

use crate::row::ENTRY_COLUMNS;
use evidence_core::{EntryKind, ProvenanceSource, Timestamp};
use rusqlite::types::ToSql;
use serde::{Deserialize, Serialize};

/// Column to order results by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderField {
    #[default]
    Timestamp,
    /// Scalar confidence; entries without one sort last
    Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

impl OrderDirection {
    const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Criteria for [`EvidenceStore::query`](crate::EvidenceStore::query).
///
/// Every filter is optional and filters combine with AND. Without an
/// explicit order, newest entries come first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceQuery {
    /// Match any of these kinds; empty means all
    pub kinds: Vec<EntryKind>,
    /// Inclusive lower time bound
    pub since: Option<Timestamp>,
    /// Inclusive upper time bound
    pub until: Option<Timestamp>,
    pub session_id: Option<String>,
    pub source: Option<ProvenanceSource>,
    /// Substring of the serialized payload
    pub text: Option<String>,
    pub limit: Option<usize>,
    /// Rows to skip; honoured with or without a limit
    pub offset: Option<usize>,
    pub order_by: OrderField,
    pub direction: OrderDirection,
}

impl EvidenceQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kind(mut self, kind: EntryKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    #[must_use]
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = EntryKind>) -> Self {
        for kind in kinds {
            self = self.kind(kind);
        }
        self
    }

    #[must_use]
    pub fn since(mut self, ts: Timestamp) -> Self {
        self.since = Some(ts);
        self
    }

    #[must_use]
    pub fn until(mut self, ts: Timestamp) -> Self {
        self.until = Some(ts);
        self
    }

    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn source(mut self, source: ProvenanceSource) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: OrderField, direction: OrderDirection) -> Self {
        self.order_by = field;
        self.direction = direction;
        self
    }

    /// Full SELECT with ordering and pagination
    pub(crate) fn select_sql(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let (filter, mut params) = self.where_clause();
        let dir = self.direction.sql();
        let order = match self.order_by {
            OrderField::Timestamp => format!("timestamp {dir}, rowid {dir}"),
            OrderField::Confidence => format!(
                "confidence_value IS NULL, confidence_value {dir}, timestamp {dir}, rowid {dir}"
            ),
        };

        let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM evidence_entries{filter} ORDER BY {order}");

        if self.limit.is_some() || self.offset.is_some() {
            // SQLite needs a LIMIT before OFFSET; -1 means unbounded
            let limit = self.limit.map_or(-1, to_sql_int);
            let offset = self.offset.map_or(0, to_sql_int);
            sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", params.len() + 1, params.len() + 2));
            params.push(Box::new(limit));
            params.push(Box::new(offset));
        }
        (sql, params)
    }

    /// COUNT over the filters, ignoring pagination and order
    pub(crate) fn count_sql(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let (filter, params) = self.where_clause();
        (format!("SELECT COUNT(*) FROM evidence_entries{filter}"), params)
    }

    fn where_clause(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        let next = |value: Box<dyn ToSql>, params: &mut Vec<Box<dyn ToSql>>| {
            params.push(value);
            format!("?{}", params.len())
        };

        if !self.kinds.is_empty() {
            let placeholders: Vec<String> = self
                .kinds
                .iter()
                .map(|kind| next(Box::new(kind.as_str()), &mut params))
                .collect();
            clauses.push(format!("kind IN ({})", placeholders.join(", ")));
        }
        if let Some(since) = &self.since {
            let p = next(Box::new(since.to_canonical()), &mut params);
            clauses.push(format!("timestamp >= {p}"));
        }
        if let Some(until) = &self.until {
            let p = next(Box::new(until.to_canonical()), &mut params);
            clauses.push(format!("timestamp <= {p}"));
        }
        if let Some(session) = &self.session_id {
            let p = next(Box::new(session.clone()), &mut params);
            clauses.push(format!("session_id = {p}"));
        }
        if let Some(source) = self.source {
            let p = next(Box::new(source.as_str()), &mut params);
            clauses.push(format!("json_extract(provenance, '$.source') = {p}"));
        }
        if let Some(text) = &self.text {
            let p = next(Box::new(format!("%{}%", escape_like(text))), &mut params);
            clauses.push(format!("payload LIKE {p} ESCAPE '\\'"));
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (filter, params)
    }
}

fn to_sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query() {
        let (sql, params) = EvidenceQuery::new().select_sql();
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("ORDER BY timestamp DESC, rowid DESC"));
        assert!(params.is_empty());
    }

    #[test]
    fn test_filters_numbered_in_order() {
        let query = EvidenceQuery::new()
            .kind(EntryKind::Claim)
            .kind(EntryKind::Synthesis)
            .kind(EntryKind::Claim)
            .session("s1")
            .text("50%_off");
        let (sql, params) = query.select_sql();
        assert!(sql.contains("kind IN (?1, ?2)"));
        assert!(sql.contains("session_id = ?3"));
        assert!(sql.contains("payload LIKE ?4"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_offset_without_limit() {
        let (sql, params) = EvidenceQuery::new().offset(10).select_sql();
        assert!(sql.ends_with("LIMIT ?1 OFFSET ?2"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_confidence_nulls_last() {
        let (sql, _) = EvidenceQuery::new()
            .order_by(OrderField::Confidence, OrderDirection::Asc)
            .select_sql();
        assert!(sql.contains("ORDER BY confidence_value IS NULL, confidence_value ASC"));
    }

    #[test]
    fn test_count_ignores_pagination() {
        let (sql, params) = EvidenceQuery::new()
            .source(ProvenanceSource::ToolOutput)
            .limit(5)
            .offset(2)
            .count_sql();
        assert!(sql.starts_with("SELECT COUNT(*)"));
        assert!(!sql.contains("LIMIT"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a%b_c\\d"), "a\\%b\\_c\\\\d");
    }
}
