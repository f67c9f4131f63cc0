//! Chain reconstruction.
//!
//! Starting from a root entry, relations are followed breadth first. Every
//! reachable non-contradiction entry becomes a node of the dependency graph.
//! Contradiction entries are collected separately, both when traversal
//! reaches them and when they point back at a chain member. Traversal walks
//! through a contradiction: its own relations are followed, so entries only
//! reachable behind it still join the chain, and its dependents are linked
//! straight to those entries.

use crate::error::ChainError;
use crate::graph::DependencyGraph;
use crate::propagation::{PenaltySummary, PropagationRule, aggregate_confidence};
use crate::source::EvidenceSource;
use evidence_core::{ConfidenceValue, EntryId, EvidenceEntry};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Options for chain construction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainOptions {
    /// Propagation rule
    pub rule: PropagationRule,
    /// Per-entry weights for `weighted_average`; unlisted entries weigh 1
    pub weights: HashMap<EntryId, f64>,
}

impl ChainOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the propagation rule
    #[must_use]
    pub fn with_rule(mut self, rule: PropagationRule) -> Self {
        self.rule = rule;
        self
    }

    /// Set the weight of one entry
    #[must_use]
    pub fn with_weight(mut self, id: EntryId, weight: f64) -> Self {
        self.weights.insert(id, weight);
        self
    }
}

/// A reconstructed chain. Derived per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceChain {
    /// The requested entry
    pub root: EvidenceEntry,
    /// Every chain entry, dependencies first
    pub evidence: Vec<EvidenceEntry>,
    /// Dependency graph over `evidence`
    pub graph: DependencyGraph,
    /// Aggregated confidence
    pub chain_confidence: ConfidenceValue,
    /// Contradictions found during traversal or referencing the chain
    pub contradictions: Vec<EvidenceEntry>,
    /// Entries placed after Kahn ordering stalled on a cycle
    pub cycle_members: Vec<EntryId>,
    /// Relation targets that do not exist
    pub missing: Vec<EntryId>,
}

impl EvidenceChain {
    /// Ids of `evidence`, in order
    #[must_use]
    pub fn ids(&self) -> Vec<&EntryId> {
        self.evidence.iter().map(|entry| &entry.id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.evidence.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evidence.is_empty()
    }

    /// Whether ordering had to fall back for a cycle
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        !self.cycle_members.is_empty()
    }

    /// Contradiction counts by severity
    #[must_use]
    pub fn penalties(&self) -> PenaltySummary {
        PenaltySummary::from_entries(&self.contradictions)
    }
}

/// Builds chains from an [`EvidenceSource`]
#[derive(Debug)]
pub struct ChainBuilder<'a, S> {
    source: &'a S,
    options: ChainOptions,
}

impl<'a, S: EvidenceSource> ChainBuilder<'a, S> {
    /// Builder with default options
    #[must_use]
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            options: ChainOptions::default(),
        }
    }

    /// Replace the options
    #[must_use]
    pub fn with_options(mut self, options: ChainOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the propagation rule
    #[must_use]
    pub fn with_rule(mut self, rule: PropagationRule) -> Self {
        self.options.rule = rule;
        self
    }

    /// Reconstruct the chain rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::RootNotFound`] (converted into the source's
    /// error type) for an unknown root, or any error raised by the source.
    pub fn build(&self, root: &EntryId) -> Result<EvidenceChain, S::Error> {
        let root_entry = self
            .source
            .fetch(root)?
            .ok_or_else(|| ChainError::RootNotFound { id: root.clone() })?;

        let mut graph = DependencyGraph::new();
        let mut collected: IndexMap<EntryId, EvidenceEntry> = IndexMap::new();
        let mut contradictions: IndexMap<EntryId, EvidenceEntry> = IndexMap::new();
        let mut missing: IndexSet<EntryId> = IndexSet::new();
        let mut queue: VecDeque<EntryId> = VecDeque::new();

        graph.add_node(root_entry.id.clone());
        queue.push_back(root_entry.id.clone());
        collected.insert(root_entry.id.clone(), root_entry.clone());

        while let Some(current) = queue.pop_front() {
            let dependencies: Vec<EntryId> = match collected
                .get(&current)
                .or_else(|| contradictions.get(&current))
            {
                Some(entry) => entry.dependency_ids().into_iter().cloned().collect(),
                None => continue,
            };

            for dependency in dependencies {
                if collected.contains_key(&dependency)
                    || contradictions.contains_key(&dependency)
                    || missing.contains(&dependency)
                {
                    continue;
                }
                match self.source.fetch(&dependency)? {
                    None => {
                        tracing::debug!(from = %current, target = %dependency, "dangling relation");
                        missing.insert(dependency);
                    }
                    Some(entry) if entry.is_contradiction() => {
                        queue.push_back(dependency.clone());
                        contradictions.insert(dependency, entry);
                    }
                    Some(entry) => {
                        graph.add_node(dependency.clone());
                        queue.push_back(dependency.clone());
                        collected.insert(dependency, entry);
                    }
                }
            }
        }

        for (dependent, entry) in &collected {
            for dependency in resolve_through_contradictions(entry, &collected, &contradictions) {
                graph.add_edge(dependent, &dependency);
            }
        }

        let members: Vec<EntryId> = collected.keys().cloned().collect();
        for entry in self.source.contradictions_referencing(&members)? {
            if !collected.contains_key(&entry.id) && !contradictions.contains_key(&entry.id) {
                contradictions.insert(entry.id.clone(), entry);
            }
        }

        let sorted = graph.topological_order();
        let evidence: Vec<EvidenceEntry> = sorted
            .order
            .iter()
            .filter_map(|id| collected.get(id).cloned())
            .collect();
        let contradictions: Vec<EvidenceEntry> = contradictions.into_values().collect();

        let chain_confidence = aggregate_confidence(
            &evidence,
            &contradictions,
            self.options.rule,
            &self.options.weights,
        );

        tracing::debug!(
            root = %root,
            evidence = evidence.len(),
            contradictions = contradictions.len(),
            missing = missing.len(),
            cycle_residual = sorted.residual.len(),
            rule = %self.options.rule,
            "built evidence chain"
        );

        Ok(EvidenceChain {
            root: root_entry,
            evidence,
            graph,
            chain_confidence,
            contradictions,
            cycle_members: sorted.residual,
            missing: missing.into_iter().collect(),
        })
    }
}

/// Chain members `entry` depends on, looking through contradiction entries
///
/// A contradiction is never a graph node, so a member that relates to a
/// contradiction depends on whatever that contradiction relates to. A path
/// that leads back to `entry` through contradictions adds no edge.
fn resolve_through_contradictions(
    entry: &EvidenceEntry,
    collected: &IndexMap<EntryId, EvidenceEntry>,
    contradictions: &IndexMap<EntryId, EvidenceEntry>,
) -> Vec<EntryId> {
    let mut resolved: IndexSet<EntryId> = IndexSet::new();
    let mut visited: IndexSet<&EntryId> = IndexSet::new();
    let mut stack: Vec<(&EntryId, bool)> = entry
        .dependency_ids()
        .into_iter()
        .rev()
        .map(|id| (id, false))
        .collect();

    while let Some((id, via_contradiction)) = stack.pop() {
        if collected.contains_key(id) {
            if !(via_contradiction && *id == entry.id) {
                resolved.insert(id.clone());
            }
        } else if let Some(contradiction) = contradictions.get(id) {
            if visited.insert(id) {
                stack.extend(
                    contradiction
                        .dependency_ids()
                        .into_iter()
                        .rev()
                        .map(|next| (next, true)),
                );
            }
        }
    }
    resolved.into_iter().collect()
}

/// Build a chain with the given options
///
/// # Errors
///
/// See [`ChainBuilder::build`]
pub fn build_chain<S: EvidenceSource>(
    source: &S,
    root: &EntryId,
    options: &ChainOptions,
) -> Result<EvidenceChain, S::Error> {
    ChainBuilder::new(source)
        .with_options(options.clone())
        .build(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;
    use evidence_core::{
        AbsentReason, EntryKind, EvidenceDraft, Provenance, ProvenanceSource, RelationType,
        Timestamp,
    };
    use serde_json::json;

    fn id(name: &str) -> EntryId {
        EntryId::from_raw(name)
    }

    fn entry(name: &str, confidence: f64, relations: &[(&str, RelationType)]) -> EvidenceEntry {
        EvidenceDraft::new(
            EntryKind::Claim,
            json!({"name": name}),
            Provenance::new(ProvenanceSource::UserInput, "test"),
        )
        .with_confidence(ConfidenceValue::measured(confidence, 20))
        .with_relations(
            relations
                .iter()
                .map(|(target, relation)| evidence_core::EvidenceRelation::new(id(target), *relation)),
        )
        .into_entry(id(name), Timestamp::now_monotonic())
    }

    fn contradiction(name: &str, severity: &str, targets: &[&str]) -> EvidenceEntry {
        EvidenceDraft::new(
            EntryKind::Contradiction,
            json!({"severity": severity}),
            Provenance::new(ProvenanceSource::SystemObservation, "detector"),
        )
        .with_relations(
            targets
                .iter()
                .map(|target| evidence_core::EvidenceRelation::new(id(target), RelationType::Contradicts)),
        )
        .into_entry(id(name), Timestamp::now_monotonic())
    }

    fn names(chain: &EvidenceChain) -> Vec<&str> {
        chain.evidence.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_worked_example() {
        let source: InMemorySource = vec![
            entry("A", 0.9, &[]),
            entry("B", 0.6, &[("A", RelationType::Supports)]),
            contradiction("C", "significant", &["A", "B"]),
        ]
        .into_iter()
        .collect();

        let chain = ChainBuilder::new(&source).build(&id("B")).unwrap();
        assert_eq!(names(&chain), vec!["A", "B"]);
        assert_eq!(chain.root.id, id("B"));
        let contradiction_ids: Vec<&str> =
            chain.contradictions.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(contradiction_ids, vec!["C"]);
        let value = chain.chain_confidence.scalar().unwrap();
        assert!((value - 0.3).abs() < 1e-12);
        assert!(!chain.has_cycle());
    }

    #[test]
    fn test_unknown_root() {
        let source = InMemorySource::new();
        let err = ChainBuilder::new(&source).build(&id("nope")).unwrap_err();
        assert_eq!(err, ChainError::RootNotFound { id: id("nope") });
    }

    #[test]
    fn test_transitive_and_diamond() {
        let source: InMemorySource = vec![
            entry("leaf", 0.9, &[]),
            entry("left", 0.8, &[("leaf", RelationType::DerivedFrom)]),
            entry("right", 0.7, &[("leaf", RelationType::DerivedFrom)]),
            entry(
                "top",
                0.6,
                &[("left", RelationType::Supports), ("right", RelationType::Supports)],
            ),
        ]
        .into_iter()
        .collect();

        let chain = build_chain(
            &source,
            &id("top"),
            &ChainOptions::new().with_rule(PropagationRule::Product),
        )
        .unwrap();
        assert_eq!(names(&chain), vec!["leaf", "left", "right", "top"]);
        assert_eq!(chain.graph.edge_count(), 4);
        let expected = 0.9 * 0.8 * 0.7 * 0.6;
        assert!((chain.chain_confidence.scalar().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_cycle_terminates_with_every_entry_once() {
        let source: InMemorySource = vec![
            entry("a", 0.5, &[("b", RelationType::DerivedFrom)]),
            entry("b", 0.5, &[("c", RelationType::DerivedFrom)]),
            entry("c", 0.5, &[("a", RelationType::DerivedFrom)]),
        ]
        .into_iter()
        .collect();

        let chain = ChainBuilder::new(&source).build(&id("a")).unwrap();
        assert_eq!(chain.len(), 3);
        assert!(chain.has_cycle());
        assert!(chain.graph.has_cycle());
        let unique: IndexSet<&EntryId> = chain.ids().into_iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_contradiction_reached_by_traversal_is_not_evidence() {
        let source: InMemorySource = vec![
            contradiction("x", "minor", &[]),
            entry("root", 1.0, &[("x", RelationType::Contradicts)]),
        ]
        .into_iter()
        .collect();

        let chain = ChainBuilder::new(&source).build(&id("root")).unwrap();
        assert_eq!(names(&chain), vec!["root"]);
        assert_eq!(chain.contradictions.len(), 1);
        assert!((chain.chain_confidence.scalar().unwrap() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_traversal_walks_through_contradiction() {
        let mut behind = contradiction("C", "minor", &[]);
        behind.related_entries = vec![evidence_core::EvidenceRelation::new(
            id("D"),
            RelationType::DerivedFrom,
        )];
        let source: InMemorySource = vec![
            entry("D", 0.8, &[]),
            behind,
            entry("A", 0.9, &[("C", RelationType::Contradicts)]),
        ]
        .into_iter()
        .collect();

        let chain = ChainBuilder::new(&source).build(&id("A")).unwrap();
        assert_eq!(names(&chain), vec!["D", "A"]);
        let contradiction_ids: Vec<&str> =
            chain.contradictions.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(contradiction_ids, vec!["C"]);
        assert!(!chain.graph.contains(&id("C")));
        assert_eq!(chain.graph.edge_count(), 1);
        assert!(chain.missing.is_empty());
        assert!(!chain.has_cycle());
    }

    #[test]
    fn test_contradiction_pointing_back_adds_no_cycle() {
        let source: InMemorySource = vec![
            contradiction("C", "minor", &["A"]),
            entry("A", 0.9, &[("C", RelationType::Contradicts)]),
        ]
        .into_iter()
        .collect();

        let chain = ChainBuilder::new(&source).build(&id("A")).unwrap();
        assert_eq!(names(&chain), vec!["A"]);
        assert_eq!(chain.contradictions.len(), 1);
        assert!(!chain.has_cycle());
    }

    #[test]
    fn test_blocking_contradiction_zeroes() {
        let source: InMemorySource = vec![
            entry("a", 0.95, &[]),
            contradiction("stop", "blocking", &["a"]),
        ]
        .into_iter()
        .collect();

        for rule in PropagationRule::ALL {
            let chain = ChainBuilder::new(&source)
                .with_rule(rule)
                .build(&id("a"))
                .unwrap();
            assert_eq!(chain.chain_confidence.scalar(), Some(0.0));
            assert_eq!(chain.penalties().blocking, 1);
        }
    }

    #[test]
    fn test_missing_targets_reported() {
        let source: InMemorySource = vec![entry("a", 0.5, &[("ghost", RelationType::Supports)])]
            .into_iter()
            .collect();

        let chain = ChainBuilder::new(&source).build(&id("a")).unwrap();
        assert_eq!(names(&chain), vec!["a"]);
        assert_eq!(chain.missing, vec![id("ghost")]);
    }

    #[test]
    fn test_entry_without_confidence() {
        let mut bare = entry("bare", 0.5, &[]);
        bare.confidence = None;
        let source: InMemorySource = vec![bare, entry("top", 0.7, &[("bare", RelationType::Supports)])]
            .into_iter()
            .collect();

        let chain = ChainBuilder::new(&source).build(&id("top")).unwrap();
        assert_eq!(
            chain.chain_confidence,
            ConfidenceValue::absent(AbsentReason::InsufficientData)
        );
    }
}
