//! Confidence propagation across a chain.
//!
//! Each entry is reduced to a scalar, the scalars are combined with a
//! [`PropagationRule`], and contradiction penalties are applied to the
//! combined value. The result is wrapped as a derived confidence whose
//! formula names the rule and every penalty.

use crate::error::ChainError;
use evidence_core::{AbsentReason, ConfidenceInput, ConfidenceValue, EntryId, EvidenceEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Combinator reducing a set of scalar confidences to one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationRule {
    /// Weakest link
    #[default]
    Min,
    /// Strongest link
    Max,
    /// Independent conjunction
    Product,
    /// Weighted mean, weights default to 1
    WeightedAverage,
    /// `1 - prod(1 - p)`, independent alternative causes
    NoisyOr,
}

impl PropagationRule {
    /// Every rule
    pub const ALL: [PropagationRule; 5] = [
        Self::Min,
        Self::Max,
        Self::Product,
        Self::WeightedAverage,
        Self::NoisyOr,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Product => "product",
            Self::WeightedAverage => "weighted_average",
            Self::NoisyOr => "noisy_or",
        }
    }

    /// Combine weighted scalars. `None` for an empty input.
    ///
    /// A zero total weight yields 0.
    #[must_use]
    pub fn combine(self, values: &[(f64, f64)]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let scalars = values.iter().map(|(value, _)| *value);
        let combined = match self {
            Self::Min => scalars.fold(f64::INFINITY, f64::min),
            Self::Max => scalars.fold(f64::NEG_INFINITY, f64::max),
            Self::Product => scalars.product(),
            Self::WeightedAverage => {
                let total: f64 = values.iter().map(|(_, weight)| *weight).sum();
                if total == 0.0 {
                    0.0
                } else {
                    values.iter().map(|(value, weight)| value * weight).sum::<f64>() / total
                }
            }
            Self::NoisyOr => 1.0 - scalars.map(|p| 1.0 - p).product::<f64>(),
        };
        Some(combined)
    }
}

impl std::fmt::Display for PropagationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PropagationRule {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|rule| rule.as_str() == s)
            .ok_or_else(|| ChainError::UnknownRule {
                value: s.to_string(),
            })
    }
}

/// Severity tier of a contradiction entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionSeverity {
    Minor,
    Significant,
    Blocking,
}

impl ContradictionSeverity {
    /// Severity declared in the entry payload's `severity` field.
    ///
    /// Missing or unrecognised values count as minor.
    #[must_use]
    pub fn of(entry: &EvidenceEntry) -> Self {
        match entry.payload.get("severity").and_then(|v| v.as_str()) {
            Some("blocking") => Self::Blocking,
            Some("significant") => Self::Significant,
            _ => Self::Minor,
        }
    }
}

/// Counts of contradictions per severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltySummary {
    pub blocking: usize,
    pub significant: usize,
    pub minor: usize,
}

impl PenaltySummary {
    /// Multiplier for each significant contradiction
    pub const SIGNIFICANT_FACTOR: f64 = 0.5;
    /// Lower bound after a significant penalty
    pub const SIGNIFICANT_FLOOR: f64 = 0.1;
    /// Multiplier for each minor contradiction
    pub const MINOR_FACTOR: f64 = 0.9;

    /// Tally severities of the given contradictions
    pub fn from_entries<'a>(contradictions: impl IntoIterator<Item = &'a EvidenceEntry>) -> Self {
        let mut summary = Self::default();
        for entry in contradictions {
            match ContradictionSeverity::of(entry) {
                ContradictionSeverity::Blocking => summary.blocking += 1,
                ContradictionSeverity::Significant => summary.significant += 1,
                ContradictionSeverity::Minor => summary.minor += 1,
            }
        }
        summary
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocking == 0 && self.significant == 0 && self.minor == 0
    }

    /// Apply penalties: blocking zeroes, then significant, then minor
    #[must_use]
    pub fn apply(&self, value: f64) -> f64 {
        if self.blocking > 0 {
            return 0.0;
        }
        let mut penalized = value;
        for _ in 0..self.significant {
            penalized = (penalized * Self::SIGNIFICANT_FACTOR).max(Self::SIGNIFICANT_FLOOR);
        }
        for _ in 0..self.minor {
            penalized *= Self::MINOR_FACTOR;
        }
        penalized
    }

    fn describe(&self) -> String {
        if self.blocking > 0 {
            return format!("blocking contradiction x{} => 0", self.blocking);
        }
        let mut parts = Vec::new();
        if self.significant > 0 {
            parts.push(format!(
                "significant contradiction x{}: max({}, v * {}) each",
                self.significant,
                Self::SIGNIFICANT_FLOOR,
                Self::SIGNIFICANT_FACTOR
            ));
        }
        if self.minor > 0 {
            parts.push(format!(
                "minor contradiction x{}: v * {}^{}",
                self.minor,
                Self::MINOR_FACTOR,
                self.minor
            ));
        }
        parts.join("; ")
    }
}

/// Aggregate the confidence of `evidence`, penalised by `contradictions`.
///
/// Missing confidence anywhere yields `absent/insufficient_data`; an explicit
/// absent value yields `absent/uncalibrated`. A blocking contradiction yields
/// a derived 0 in every case.
#[must_use]
pub fn aggregate_confidence(
    evidence: &[EvidenceEntry],
    contradictions: &[EvidenceEntry],
    rule: PropagationRule,
    weights: &HashMap<EntryId, f64>,
) -> ConfidenceValue {
    let penalty = PenaltySummary::from_entries(contradictions);

    let inputs: Vec<ConfidenceInput> = evidence
        .iter()
        .filter(|entry| entry.confidence_scalar().is_some())
        .filter_map(|entry| {
            entry.confidence.clone().map(|confidence| ConfidenceInput {
                name: entry.id.to_string(),
                confidence,
            })
        })
        .collect();

    if penalty.blocking > 0 {
        return ConfidenceValue::Derived {
            value: 0.0,
            formula: format!("{}(...); {}", rule, penalty.describe()),
            inputs,
        };
    }

    if evidence.iter().any(|entry| entry.confidence.is_none()) {
        return ConfidenceValue::absent(AbsentReason::InsufficientData);
    }
    if evidence
        .iter()
        .any(|entry| entry.confidence.as_ref().is_some_and(ConfidenceValue::is_absent))
    {
        return ConfidenceValue::absent(AbsentReason::Uncalibrated);
    }

    let weighted: Vec<(f64, f64)> = evidence
        .iter()
        .filter_map(|entry| {
            entry
                .confidence_scalar()
                .map(|value| (value, weights.get(&entry.id).copied().unwrap_or(1.0)))
        })
        .collect();

    let Some(combined) = rule.combine(&weighted) else {
        return ConfidenceValue::absent(AbsentReason::InsufficientData);
    };

    let value = penalty.apply(combined).clamp(0.0, 1.0);
    let mut formula = format!("{}({})", rule, formula_terms(evidence, rule, weights));
    if !penalty.is_empty() {
        formula.push_str("; ");
        formula.push_str(&penalty.describe());
    }

    ConfidenceValue::Derived {
        value,
        formula,
        inputs,
    }
}

fn formula_terms(
    evidence: &[EvidenceEntry],
    rule: PropagationRule,
    weights: &HashMap<EntryId, f64>,
) -> String {
    evidence
        .iter()
        .map(|entry| match rule {
            PropagationRule::WeightedAverage => format!(
                "{}*{}",
                entry.id,
                weights.get(&entry.id).copied().unwrap_or(1.0)
            ),
            _ => entry.id.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidence_core::{EntryKind, EvidenceDraft, Provenance, ProvenanceSource, Timestamp};
    use serde_json::json;

    const EPSILON: f64 = 1e-12;

    fn entry(name: &str, confidence: Option<ConfidenceValue>) -> EvidenceEntry {
        let mut draft = EvidenceDraft::new(
            EntryKind::Claim,
            json!({"name": name}),
            Provenance::new(ProvenanceSource::UserInput, "test"),
        );
        draft.confidence = confidence;
        draft.into_entry(EntryId::from_raw(name), Timestamp::now_monotonic())
    }

    fn measured(name: &str, value: f64) -> EvidenceEntry {
        entry(name, Some(ConfidenceValue::measured(value, 10)))
    }

    fn contradiction(name: &str, severity: &str) -> EvidenceEntry {
        EvidenceDraft::new(
            EntryKind::Contradiction,
            json!({"severity": severity}),
            Provenance::new(ProvenanceSource::SystemObservation, "detector"),
        )
        .into_entry(EntryId::from_raw(name), Timestamp::now_monotonic())
    }

    fn value_of(confidence: &ConfidenceValue) -> f64 {
        confidence.scalar().unwrap()
    }

    #[test]
    fn test_single_entry_boundaries() {
        let chain = vec![measured("a", 0.42)];
        for rule in [
            PropagationRule::Min,
            PropagationRule::Max,
            PropagationRule::Product,
            PropagationRule::NoisyOr,
            PropagationRule::WeightedAverage,
        ] {
            let result = aggregate_confidence(&chain, &[], rule, &HashMap::new());
            assert!((value_of(&result) - 0.42).abs() < EPSILON, "rule {}", rule);
        }
    }

    #[test]
    fn test_rules() {
        let chain = vec![measured("a", 0.8), measured("b", 0.5)];
        let none = HashMap::new();
        let run = |rule| value_of(&aggregate_confidence(&chain, &[], rule, &none));

        assert!((run(PropagationRule::Min) - 0.5).abs() < EPSILON);
        assert!((run(PropagationRule::Max) - 0.8).abs() < EPSILON);
        assert!((run(PropagationRule::Product) - 0.4).abs() < EPSILON);
        assert!((run(PropagationRule::WeightedAverage) - 0.65).abs() < EPSILON);

        let half = vec![measured("a", 0.5), measured("b", 0.5)];
        let noisy = aggregate_confidence(&half, &[], PropagationRule::NoisyOr, &none);
        assert!((value_of(&noisy) - 0.75).abs() < EPSILON);
    }

    #[test]
    fn test_weighted_average_weights() {
        let chain = vec![measured("a", 1.0), measured("b", 0.0)];
        let mut weights = HashMap::new();
        weights.insert(EntryId::from_raw("a"), 3.0);
        let result =
            aggregate_confidence(&chain, &[], PropagationRule::WeightedAverage, &weights);
        assert!((value_of(&result) - 0.75).abs() < EPSILON);

        let mut zero = HashMap::new();
        zero.insert(EntryId::from_raw("a"), 0.0);
        zero.insert(EntryId::from_raw("b"), 0.0);
        let result = aggregate_confidence(&chain, &[], PropagationRule::WeightedAverage, &zero);
        assert_eq!(value_of(&result), 0.0);
    }

    #[test]
    fn test_bounded_uses_lower_bound() {
        let chain = vec![
            entry("a", Some(ConfidenceValue::bounded(0.3, 0.9, "prior"))),
            measured("b", 0.7),
        ];
        let result = aggregate_confidence(&chain, &[], PropagationRule::Min, &HashMap::new());
        assert!((value_of(&result) - 0.3).abs() < EPSILON);
    }

    #[test]
    fn test_missing_and_absent() {
        let missing = vec![measured("a", 0.5), entry("b", None)];
        assert_eq!(
            aggregate_confidence(&missing, &[], PropagationRule::Min, &HashMap::new()),
            ConfidenceValue::absent(AbsentReason::InsufficientData)
        );

        let absent = vec![
            measured("a", 0.5),
            entry("b", Some(ConfidenceValue::absent(AbsentReason::NotApplicable))),
        ];
        assert_eq!(
            aggregate_confidence(&absent, &[], PropagationRule::Min, &HashMap::new()),
            ConfidenceValue::absent(AbsentReason::Uncalibrated)
        );
    }

    #[test]
    fn test_blocking_dominates() {
        let chain = vec![measured("a", 0.99), entry("b", None)];
        let blocking = vec![contradiction("c", "blocking"), contradiction("d", "minor")];
        for rule in PropagationRule::ALL {
            let result = aggregate_confidence(&chain, &blocking, rule, &HashMap::new());
            assert_eq!(value_of(&result), 0.0);
            let ConfidenceValue::Derived { formula, inputs, .. } = result else {
                panic!("expected derived confidence");
            };
            assert!(formula.contains("blocking"));
            assert_eq!(inputs.len(), 1);
        }
    }

    #[test]
    fn test_penalty_arithmetic() {
        let significant = PenaltySummary {
            significant: 1,
            ..PenaltySummary::default()
        };
        assert!((significant.apply(0.6) - 0.3).abs() < EPSILON);
        assert!((significant.apply(0.1) - 0.1).abs() < EPSILON);

        let twice = PenaltySummary {
            significant: 2,
            ..PenaltySummary::default()
        };
        assert!((twice.apply(0.3) - 0.1).abs() < EPSILON);

        let minor = PenaltySummary {
            minor: 2,
            ..PenaltySummary::default()
        };
        assert!((minor.apply(1.0) - 0.81).abs() < EPSILON);
    }

    #[test]
    fn test_derived_formula_and_inputs() {
        let chain = vec![measured("a", 0.8), measured("b", 0.6)];
        let result = aggregate_confidence(
            &chain,
            &[contradiction("c", "significant")],
            PropagationRule::Min,
            &HashMap::new(),
        );
        let ConfidenceValue::Derived {
            value,
            formula,
            inputs,
        } = result
        else {
            panic!("expected derived confidence");
        };
        assert!((value - 0.3).abs() < EPSILON);
        assert!(formula.starts_with("min(a, b)"));
        assert!(formula.contains("significant"));
        let names: Vec<&str> = inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!(
            ContradictionSeverity::of(&contradiction("x", "blocking")),
            ContradictionSeverity::Blocking
        );
        assert_eq!(
            ContradictionSeverity::of(&contradiction("x", "catastrophic")),
            ContradictionSeverity::Minor
        );
    }

    #[test]
    fn test_rule_parse() {
        assert_eq!(
            "noisy_or".parse::<PropagationRule>().unwrap(),
            PropagationRule::NoisyOr
        );
        assert!("median".parse::<PropagationRule>().is_err());
        assert_eq!(PropagationRule::default(), PropagationRule::Min);
    }
}
