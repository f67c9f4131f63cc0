//! Agent attribution enforcement.
//!
//! Entries produced by automated synthesis or external tool invocations must
//! name the agent that produced them. Depending on configuration a missing
//! agent either rejects the entry or is recorded as a warning that callers can
//! retrieve later.

use evidence_core::{EntryKind, EvidenceDraft, ProvenanceSource, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// What to do when an entry lacks required attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationMode {
    /// Accept the entry and record a warning
    #[default]
    Warn,
    /// Refuse the entry
    Reject,
}

/// Attribution policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Whether attribution is checked at all
    pub enforce: bool,
    /// Behaviour on violation
    pub on_violation: ViolationMode,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            enforce: true,
            on_violation: ViolationMode::Warn,
        }
    }
}

impl AttributionConfig {
    /// Enforcement disabled
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enforce: false,
            on_violation: ViolationMode::Warn,
        }
    }

    /// Enforcement enabled, violations rejected
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            enforce: true,
            on_violation: ViolationMode::Reject,
        }
    }
}

/// An entry that required attribution but carried none
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{provenance_source} entry of kind {kind} produced by '{method}' has no agent attribution")]
pub struct AttributionViolation {
    /// Provenance source of the entry
    pub provenance_source: ProvenanceSource,
    /// Entry kind
    pub kind: EntryKind,
    /// Producing method
    pub method: String,
    /// Session of the entry, if any
    pub session_id: Option<String>,
}

/// A violation that was accepted and recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionWarning {
    /// Provenance source of the entry
    pub source: ProvenanceSource,
    /// Entry kind
    pub kind: EntryKind,
    /// Producing method
    pub method: String,
    /// Session of the entry, if any
    pub session_id: Option<String>,
    /// When the warning was recorded
    pub recorded_at: Timestamp,
}

impl From<&AttributionViolation> for AttributionWarning {
    fn from(violation: &AttributionViolation) -> Self {
        Self {
            source: violation.provenance_source,
            kind: violation.kind,
            method: violation.method.clone(),
            session_id: violation.session_id.clone(),
            recorded_at: Timestamp::now_monotonic(),
        }
    }
}

/// Outcome of evaluating one draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributionDecision {
    /// Enforcement is off
    Skipped,
    /// The source does not require attribution
    NotRequired,
    /// Attribution required and present
    Attributed,
    /// Attribution required and missing
    Violation(AttributionViolation),
}

/// Per-store attribution guard
#[derive(Debug, Default)]
pub struct AttributionGuard {
    config: AttributionConfig,
    warnings: Mutex<Vec<AttributionWarning>>,
}

impl AttributionGuard {
    /// Sources whose entries must name an agent
    pub const ATTRIBUTED_SOURCES: [ProvenanceSource; 2] =
        [ProvenanceSource::LlmSynthesis, ProvenanceSource::ToolOutput];

    /// Create a guard
    #[must_use]
    pub fn new(config: AttributionConfig) -> Self {
        Self {
            config,
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &AttributionConfig {
        &self.config
    }

    /// Whether entries from `source` must carry an agent
    #[must_use]
    pub fn requires_attribution(source: ProvenanceSource) -> bool {
        Self::ATTRIBUTED_SOURCES.contains(&source)
    }

    /// Evaluate a draft without side effects
    #[must_use]
    pub fn evaluate(&self, draft: &EvidenceDraft) -> AttributionDecision {
        if !self.config.enforce {
            return AttributionDecision::Skipped;
        }
        let provenance = &draft.provenance;
        if !Self::requires_attribution(provenance.source) {
            return AttributionDecision::NotRequired;
        }
        if provenance.agent_id().is_some() {
            return AttributionDecision::Attributed;
        }
        AttributionDecision::Violation(AttributionViolation {
            provenance_source: provenance.source,
            kind: draft.kind,
            method: provenance.method.clone(),
            session_id: draft.session_id.clone(),
        })
    }

    /// Check one draft, recording a warning or rejecting per configuration
    ///
    /// # Errors
    ///
    /// Returns the violation when configured to reject
    pub fn check(&self, draft: &EvidenceDraft) -> Result<(), AttributionViolation> {
        self.check_all(std::slice::from_ref(draft))
    }

    /// Check every draft of a batch before any of them is written.
    ///
    /// In reject mode the first violation is returned and nothing is
    /// recorded. In warn mode every violation is recorded.
    ///
    /// # Errors
    ///
    /// Returns the first violation when configured to reject
    pub fn check_all(&self, drafts: &[EvidenceDraft]) -> Result<(), AttributionViolation> {
        let violations: Vec<AttributionViolation> = drafts
            .iter()
            .filter_map(|draft| match self.evaluate(draft) {
                AttributionDecision::Violation(v) => Some(v),
                _ => None,
            })
            .collect();

        if violations.is_empty() {
            return Ok(());
        }

        match self.config.on_violation {
            ViolationMode::Reject => violations.into_iter().next().map_or(Ok(()), Err),
            ViolationMode::Warn => {
                let mut warnings = self.warnings.lock();
                for violation in &violations {
                    tracing::warn!(
                        source = %violation.provenance_source,
                        kind = %violation.kind,
                        method = %violation.method,
                        "accepted evidence without agent attribution"
                    );
                    warnings.push(AttributionWarning::from(violation));
                }
                Ok(())
            }
        }
    }

    /// Recorded warnings, oldest first
    #[must_use]
    pub fn warnings(&self) -> Vec<AttributionWarning> {
        self.warnings.lock().clone()
    }

    /// Drain recorded warnings
    pub fn take_warnings(&self) -> Vec<AttributionWarning> {
        std::mem::take(&mut *self.warnings.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidence_core::{AgentIdentity, Provenance};
    use serde_json::json;

    fn draft(source: ProvenanceSource, agent: Option<&str>) -> EvidenceDraft {
        let mut provenance = Provenance::new(source, "summarize");
        if let Some(id) = agent {
            provenance = provenance.with_agent(AgentIdentity::new(id));
        }
        EvidenceDraft::new(EntryKind::Synthesis, json!({"text": "t"}), provenance)
    }

    #[test]
    fn test_default_config_warns() {
        let config = AttributionConfig::default();
        assert!(config.enforce);
        assert_eq!(config.on_violation, ViolationMode::Warn);
    }

    #[test]
    fn test_requires_attribution() {
        assert!(AttributionGuard::requires_attribution(ProvenanceSource::LlmSynthesis));
        assert!(AttributionGuard::requires_attribution(ProvenanceSource::ToolOutput));
        assert!(!AttributionGuard::requires_attribution(ProvenanceSource::AstParser));
        assert!(!AttributionGuard::requires_attribution(ProvenanceSource::UserInput));
    }

    #[test]
    fn test_evaluate() {
        let guard = AttributionGuard::new(AttributionConfig::default());
        assert_eq!(
            guard.evaluate(&draft(ProvenanceSource::AstParser, None)),
            AttributionDecision::NotRequired
        );
        assert_eq!(
            guard.evaluate(&draft(ProvenanceSource::LlmSynthesis, Some("agent-1"))),
            AttributionDecision::Attributed
        );
        assert!(matches!(
            guard.evaluate(&draft(ProvenanceSource::LlmSynthesis, Some(""))),
            AttributionDecision::Violation(_)
        ));
    }

    #[test]
    fn test_warn_mode_records() {
        let guard = AttributionGuard::new(AttributionConfig::default());
        guard.check(&draft(ProvenanceSource::ToolOutput, None)).unwrap();
        let warnings = guard.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].source, ProvenanceSource::ToolOutput);

        assert_eq!(guard.take_warnings().len(), 1);
        assert!(guard.warnings().is_empty());
    }

    #[test]
    fn test_reject_mode() {
        let guard = AttributionGuard::new(AttributionConfig::strict());
        let err = guard
            .check(&draft(ProvenanceSource::LlmSynthesis, None))
            .unwrap_err();
        assert_eq!(err.method, "summarize");
        assert!(err.to_string().contains("no agent attribution"));
        assert!(guard.warnings().is_empty());
    }

    #[test]
    fn test_disabled_accepts_everything() {
        let guard = AttributionGuard::new(AttributionConfig::disabled());
        guard.check(&draft(ProvenanceSource::LlmSynthesis, None)).unwrap();
        assert!(guard.warnings().is_empty());
    }

    #[test]
    fn test_check_all_rejects_before_recording() {
        let guard = AttributionGuard::new(AttributionConfig::strict());
        let batch = vec![
            draft(ProvenanceSource::UserInput, None),
            draft(ProvenanceSource::LlmSynthesis, Some("a")),
            draft(ProvenanceSource::ToolOutput, None),
        ];
        let err = guard.check_all(&batch).unwrap_err();
        assert_eq!(err.provenance_source, ProvenanceSource::ToolOutput);
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: AttributionConfig = serde_json::from_str(r#"{"on_violation":"reject"}"#).unwrap();
        assert!(config.enforce);
        assert_eq!(config.on_violation, ViolationMode::Reject);
    }
}
