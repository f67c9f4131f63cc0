//! Dependency graph over the entries of a chain.
//!
//! Nodes keep the order in which traversal discovered them. Ordering is
//! Kahn's algorithm with the ready set keyed by discovery index, so ties are
//! broken by discovery order. Nodes left over when no node is ready belong
//! to (or depend on) a cycle; they are appended in discovery order, which
//! keeps the output a total order over every node.

use evidence_core::EntryId;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Directed graph: each node maps to the nodes it depends on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    nodes: IndexMap<EntryId, IndexSet<EntryId>>,
}

/// Result of ordering a [`DependencyGraph`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologicalOrder {
    /// Every node, dependencies before dependents where possible
    pub order: Vec<EntryId>,
    /// Nodes that could not be placed by Kahn's algorithm, in discovery order
    pub residual: Vec<EntryId>,
}

impl TopologicalOrder {
    /// Whether every node was placed without hitting a cycle
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.residual.is_empty()
    }
}

impl DependencyGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Returns false if it was already present.
    pub fn add_node(&mut self, id: EntryId) -> bool {
        if self.nodes.contains_key(&id) {
            return false;
        }
        self.nodes.insert(id, IndexSet::new());
        true
    }

    /// Record that `dependent` depends on `dependency`.
    ///
    /// Both ends are added as nodes if missing. Returns false for a
    /// duplicate edge.
    pub fn add_edge(&mut self, dependent: &EntryId, dependency: &EntryId) -> bool {
        self.add_node(dependency.clone());
        self.nodes
            .entry(dependent.clone())
            .or_default()
            .insert(dependency.clone())
    }

    /// Whether the node exists
    #[must_use]
    pub fn contains(&self, id: &EntryId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in discovery order
    pub fn nodes(&self) -> impl Iterator<Item = &EntryId> {
        self.nodes.keys()
    }

    /// Discovery position of a node
    #[must_use]
    pub fn discovery_index(&self, id: &EntryId) -> Option<usize> {
        self.nodes.get_index_of(id)
    }

    /// Nodes `id` depends on
    #[must_use]
    pub fn dependencies(&self, id: &EntryId) -> Vec<&EntryId> {
        self.nodes
            .get(id)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Nodes that depend on `id`, in discovery order
    #[must_use]
    pub fn dependents(&self, id: &EntryId) -> Vec<&EntryId> {
        self.nodes
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(node, _)| node)
            .collect()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(IndexSet::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether any cycle exists
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        !self.topological_order().is_complete()
    }

    /// Order nodes so that dependencies precede dependents.
    ///
    /// Never fails: nodes on or behind a cycle are reported in
    /// [`TopologicalOrder::residual`] and also appended to
    /// [`TopologicalOrder::order`].
    #[must_use]
    pub fn topological_order(&self) -> TopologicalOrder {
        let count = self.nodes.len();
        let mut pending: Vec<usize> = self.nodes.values().map(IndexSet::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, deps) in self.nodes.values().enumerate() {
            for dep in deps {
                if let Some(dep_index) = self.nodes.get_index_of(dep) {
                    dependents[dep_index].push(index);
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, remaining)| **remaining == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut placed = vec![false; count];
        let mut order = Vec::with_capacity(count);

        while let Some(Reverse(index)) = ready.pop() {
            placed[index] = true;
            order.push(index);
            for &dependent in &dependents[index] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        let residual: Vec<usize> = (0..count).filter(|index| !placed[*index]).collect();
        order.extend(residual.iter().copied());

        let id_at = |index: usize| {
            self.nodes
                .get_index(index)
                .map(|(id, _)| id.clone())
        };

        TopologicalOrder {
            order: order.into_iter().filter_map(id_at).collect(),
            residual: residual.into_iter().filter_map(id_at).collect(),
        }
    }
}
