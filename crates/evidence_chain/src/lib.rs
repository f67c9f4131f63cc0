//! Evidence chain reconstruction.
//!
//! Given a root entry, collects every entry reachable through declared
//! relations, orders them so dependencies come first (tolerating cycles),
//! and aggregates a chain-level confidence penalised by contradictions.

#![warn(clippy::all)]

pub mod builder;
pub mod error;
pub mod graph;
pub mod propagation;
pub mod source;

pub use builder::{ChainBuilder, ChainOptions, EvidenceChain, build_chain};
pub use error::{ChainError, ChainResult};
pub use graph::{DependencyGraph, TopologicalOrder};
pub use propagation::{
    ContradictionSeverity, PenaltySummary, PropagationRule, aggregate_confidence,
};
pub use source::{EvidenceSource, InMemorySource};
