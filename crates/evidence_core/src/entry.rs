//! Evidence entries.
//!
//! An entry is created as an [`EvidenceDraft`] and becomes an
//! [`EvidenceEntry`] once the store assigns its id and timestamp. Stored
//! entries are immutable.

use crate::confidence::ConfidenceValue;
use crate::error::{CoreError, CoreResult};
use crate::id::EntryId;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entry kind - the closed set of epistemic events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Facts pulled out of a source artifact
    Extraction,
    /// Material found by a search or lookup
    Retrieval,
    /// Conclusion combined from other entries
    Synthesis,
    /// An assertion put forward for checking
    Claim,
    /// Result of checking a claim
    Verification,
    /// Conflict between entries; carries a `severity` in its payload
    Contradiction,
    /// Reaction from a user or reviewer
    Feedback,
    /// Observed result of an action
    Outcome,
    /// One external tool invocation and its result
    ToolCall,
    /// Boundary marker for a unit of agent work
    Episode,
    /// Adjustment of confidence against observed outcomes
    Calibration,
}

impl EntryKind {
    /// Every kind, in declaration order
    pub const ALL: [EntryKind; 11] = [
        Self::Extraction,
        Self::Retrieval,
        Self::Synthesis,
        Self::Claim,
        Self::Verification,
        Self::Contradiction,
        Self::Feedback,
        Self::Outcome,
        Self::ToolCall,
        Self::Episode,
        Self::Calibration,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Retrieval => "retrieval",
            Self::Synthesis => "synthesis",
            Self::Claim => "claim",
            Self::Verification => "verification",
            Self::Contradiction => "contradiction",
            Self::Feedback => "feedback",
            Self::Outcome => "outcome",
            Self::ToolCall => "tool_call",
            Self::Episode => "episode",
            Self::Calibration => "calibration",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownKind {
                value: s.to_string(),
            })
    }
}

/// Where an entry's content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceSource {
    /// Static analysis of source code
    AstParser,
    /// Generated by a language model
    LlmSynthesis,
    /// Vector or lexical retrieval
    EmbeddingSearch,
    /// Supplied by a human
    UserInput,
    /// Returned by an external tool invocation
    ToolOutput,
    /// Observed by the system itself
    SystemObservation,
}

impl ProvenanceSource {
    /// Every source, in declaration order
    pub const ALL: [ProvenanceSource; 6] = [
        Self::AstParser,
        Self::LlmSynthesis,
        Self::EmbeddingSearch,
        Self::UserInput,
        Self::ToolOutput,
        Self::SystemObservation,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AstParser => "ast_parser",
            Self::LlmSynthesis => "llm_synthesis",
            Self::EmbeddingSearch => "embedding_search",
            Self::UserInput => "user_input",
            Self::ToolOutput => "tool_output",
            Self::SystemObservation => "system_observation",
        }
    }
}

impl std::fmt::Display for ProvenanceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProvenanceSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| CoreError::ParseError {
                message: format!("unknown provenance source: {}", s),
            })
    }
}

/// The agent that authored an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Stable agent identifier
    pub id: String,
    /// Model or tool name, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Agent or model version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl AgentIdentity {
    /// Agent with only an id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: None,
            version: None,
        }
    }

    /// Set the model name
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// How an entry was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Source category
    pub source: ProvenanceSource,
    /// Producing method
    pub method: String,
    /// Authoring agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentIdentity>,
    /// Hash of the inputs the method consumed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
    /// Method configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl Provenance {
    /// Provenance with a source and method
    #[must_use]
    pub fn new(source: ProvenanceSource, method: impl Into<String>) -> Self {
        Self {
            source,
            method: method.into(),
            agent: None,
            input_hash: None,
            config: None,
        }
    }

    /// Set the authoring agent
    #[must_use]
    pub fn with_agent(mut self, agent: AgentIdentity) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Set the input hash
    #[must_use]
    pub fn with_input_hash(mut self, hash: impl Into<String>) -> Self {
        self.input_hash = Some(hash.into());
        self
    }

    /// Set the method configuration
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Agent id, if present and non-blank
    #[must_use]
    pub fn agent_id(&self) -> Option<&str> {
        self.agent
            .as_ref()
            .map(|agent| agent.id.trim())
            .filter(|id| !id.is_empty())
    }
}

/// How one entry relates to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// The target backs this entry
    Supports,
    /// This entry was produced from the target; also the meaning of bare ids
    DerivedFrom,
    /// This entry disputes the target
    Contradicts,
    /// This entry replaces the target
    Supersedes,
}

impl RelationType {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Supports => "supports",
            Self::DerivedFrom => "derived_from",
            Self::Contradicts => "contradicts",
            Self::Supersedes => "supersedes",
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supports" => Ok(Self::Supports),
            "derived_from" => Ok(Self::DerivedFrom),
            "contradicts" => Ok(Self::Contradicts),
            "supersedes" => Ok(Self::Supersedes),
            other => Err(CoreError::ParseError {
                message: format!("unknown relation type: {}", other),
            }),
        }
    }
}

/// A typed relation to another entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceRelation {
    /// Target entry
    pub id: EntryId,
    /// Relation kind
    #[serde(rename = "type")]
    pub relation: RelationType,
}

impl EvidenceRelation {
    /// Create a relation
    #[must_use]
    pub fn new(id: EntryId, relation: RelationType) -> Self {
        Self { id, relation }
    }

    /// A legacy bare-id relation, which always means `derived_from`
    #[must_use]
    pub fn legacy(id: EntryId) -> Self {
        Self::new(id, RelationType::DerivedFrom)
    }
}

/// An entry before the store assigns its id and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceDraft {
    /// Entry kind
    pub kind: EntryKind,
    /// Arbitrary JSON content, never null
    pub payload: Value,
    /// How the content was produced
    pub provenance: Provenance,
    /// Confidence, if one was assessed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceValue>,
    /// Typed relations to earlier entries
    #[serde(default)]
    pub related_entries: Vec<EvidenceRelation>,
    /// Session this entry belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl EvidenceDraft {
    /// Draft with no confidence, relations or session
    #[must_use]
    pub fn new(kind: EntryKind, payload: Value, provenance: Provenance) -> Self {
        Self {
            kind,
            payload,
            provenance,
            confidence: None,
            related_entries: Vec::new(),
            session_id: None,
        }
    }

    /// Set the confidence
    #[must_use]
    pub fn with_confidence(mut self, confidence: ConfidenceValue) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Add one relation
    #[must_use]
    pub fn with_relation(mut self, id: EntryId, relation: RelationType) -> Self {
        self.related_entries.push(EvidenceRelation::new(id, relation));
        self
    }

    /// Add several relations, keeping their order
    #[must_use]
    pub fn with_relations(mut self, relations: impl IntoIterator<Item = EvidenceRelation>) -> Self {
        self.related_entries.extend(relations);
        self
    }

    /// Set the session
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Check the draft can be persisted
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the first problem found
    pub fn validate(&self) -> CoreResult<()> {
        if self.provenance.method.trim().is_empty() {
            return Err(CoreError::validation(
                "provenance.method",
                "must not be empty",
            ));
        }
        if self.payload.is_null() {
            return Err(CoreError::validation("payload", "must not be null"));
        }
        if let Some(hash) = &self.provenance.input_hash {
            if hash.chars().any(char::is_whitespace) {
                return Err(CoreError::validation(
                    "provenance.input_hash",
                    "must not contain whitespace",
                ));
            }
        }
        if let Some(confidence) = &self.confidence {
            confidence.validate()?;
        }
        for (i, relation) in self.related_entries.iter().enumerate() {
            if relation.id.as_str().trim().is_empty() {
                return Err(CoreError::validation(
                    format!("related_entries[{}]", i),
                    "target id must not be empty",
                ));
            }
        }
        if let Some(session) = &self.session_id {
            if session.trim().is_empty() {
                return Err(CoreError::validation("session_id", "must not be blank"));
            }
        }
        Ok(())
    }

    /// Attach the id and timestamp assigned by the store
    #[must_use]
    pub fn into_entry(self, id: EntryId, timestamp: Timestamp) -> EvidenceEntry {
        EvidenceEntry {
            id,
            timestamp,
            kind: self.kind,
            payload: self.payload,
            provenance: self.provenance,
            confidence: self.confidence,
            related_entries: self.related_entries,
            session_id: self.session_id,
        }
    }
}

/// A persisted evidence entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    /// Store-assigned id, random or content-addressed
    pub id: EntryId,
    /// Store-assigned, strictly increasing within the process
    pub timestamp: Timestamp,
    /// Entry kind
    pub kind: EntryKind,
    /// Arbitrary JSON content
    pub payload: Value,
    /// How the content was produced
    pub provenance: Provenance,
    /// Confidence, if one was assessed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceValue>,
    /// Typed relations to earlier entries
    #[serde(default)]
    pub related_entries: Vec<EvidenceRelation>,
    /// Session this entry belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl EvidenceEntry {
    /// Ids this entry depends on, in declaration order, without duplicates
    pub fn dependency_ids(&self) -> Vec<&EntryId> {
        let mut ids: Vec<&EntryId> = Vec::with_capacity(self.related_entries.len());
        for relation in &self.related_entries {
            if !ids.contains(&&relation.id) {
                ids.push(&relation.id);
            }
        }
        ids
    }

    /// Whether any relation targets `id`
    pub fn relates_to(&self, id: &EntryId) -> bool {
        self.related_entries.iter().any(|r| &r.id == id)
    }

    /// Scalar confidence, if any
    pub fn confidence_scalar(&self) -> Option<f64> {
        self.confidence.as_ref().and_then(ConfidenceValue::scalar)
    }

    /// Whether this is a contradiction entry
    #[must_use]
    pub fn is_contradiction(&self) -> bool {
        self.kind == EntryKind::Contradiction
    }

    /// Strip the assigned id and timestamp
    pub fn to_draft(&self) -> EvidenceDraft {
        EvidenceDraft {
            kind: self.kind,
            payload: self.payload.clone(),
            provenance: self.provenance.clone(),
            confidence: self.confidence.clone(),
            related_entries: self.related_entries.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claim() -> EvidenceDraft {
        EvidenceDraft::new(
            EntryKind::Claim,
            json!({"text": "the cache is write-through"}),
            Provenance::new(ProvenanceSource::UserInput, "manual"),
        )
    }

    #[test]
    fn test_kind_wire_names() {
        for kind in EntryKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(kind.as_str().parse::<EntryKind>().unwrap(), kind);
        }
        assert_eq!(EntryKind::ToolCall.as_str(), "tool_call");
        assert!("rumor".parse::<EntryKind>().is_err());
        assert!(serde_json::from_str::<EntryKind>("\"rumor\"").is_err());
    }

    #[test]
    fn test_relation_wire_format() {
        let relation = EvidenceRelation::new(EntryId::from_raw("ev_a"), RelationType::Supports);
        assert_eq!(
            serde_json::to_value(&relation).unwrap(),
            json!({"id": "ev_a", "type": "supports"})
        );
        assert_eq!(
            EvidenceRelation::legacy(EntryId::from_raw("ev_b")).relation,
            RelationType::DerivedFrom
        );
    }

    #[test]
    fn test_validate() {
        assert!(claim().validate().is_ok());

        let mut bad = claim();
        bad.provenance.method = "  ".to_string();
        assert!(bad.validate().is_err());

        let mut bad = claim();
        bad.payload = Value::Null;
        assert!(bad.validate().is_err());

        let bad = claim().with_confidence(ConfidenceValue::measured(2.0, 3));
        assert!(bad.validate().is_err());

        let bad = claim().with_relation(EntryId::from_raw(""), RelationType::Supports);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_draft_builders() {
        let a = EntryId::from_raw("ev_a");
        let b = EntryId::from_raw("ev_b");
        let draft = claim()
            .with_confidence(ConfidenceValue::measured(0.5, 4))
            .with_relation(a.clone(), RelationType::Supports)
            .with_relations([EvidenceRelation::legacy(b.clone())])
            .with_session("s1");
        assert_eq!(draft.related_entries[0], EvidenceRelation::new(a, RelationType::Supports));
        assert_eq!(draft.related_entries[1].id, b);
        assert_eq!(draft.related_entries[1].relation, RelationType::DerivedFrom);
        assert_eq!(draft.session_id.as_deref(), Some("s1"));
        assert!(draft.validate().is_ok());

        let entry = draft.into_entry(EntryId::from_raw("ev_c"), Timestamp::now_monotonic());
        assert!(!entry.is_contradiction());
        let mut disputed = entry.to_draft();
        disputed.kind = EntryKind::Contradiction;
        assert!(
            disputed
                .into_entry(EntryId::from_raw("ev_d"), Timestamp::now_monotonic())
                .is_contradiction()
        );
    }

    #[test]
    fn test_agent_id_ignores_blank() {
        let p = Provenance::new(ProvenanceSource::LlmSynthesis, "summarize")
            .with_agent(AgentIdentity::new("   "));
        assert_eq!(p.agent_id(), None);
        let p = p.with_agent(AgentIdentity::new("agent-7").with_model("m"));
        assert_eq!(p.agent_id(), Some("agent-7"));
    }

    #[test]
    fn test_dependency_ids_dedup() {
        let a = EntryId::from_raw("ev_a");
        let entry = claim()
            .with_relation(a.clone(), RelationType::Supports)
            .with_relation(a.clone(), RelationType::DerivedFrom)
            .with_relation(EntryId::from_raw("ev_b"), RelationType::Contradicts)
            .into_entry(EntryId::random(), Timestamp::now_monotonic());
        let deps = entry.dependency_ids();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0], &a);
        assert!(entry.relates_to(&a));
    }

    #[test]
    fn test_to_draft_roundtrip() {
        let draft = claim().with_session("s1");
        let entry = draft
            .clone()
            .into_entry(EntryId::random(), Timestamp::now_monotonic());
        assert_eq!(entry.to_draft(), draft);
    }
}
