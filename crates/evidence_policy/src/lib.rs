//! Evidence Ledger Policy
//!
//! Acceptance checks that run on every entry before it is persisted.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribution;

pub use attribution::{
    AttributionConfig, AttributionDecision, AttributionGuard, AttributionViolation,
    AttributionWarning, ViolationMode,
};
