//! Evidence Ledger Replay
//!
//! Reconstructs a recorded session in its original order and re-executes it
//! through a caller-supplied executor, reporting every divergence between the
//! recorded input hashes and the hashes of the fresh results.

#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod executor;
pub mod report;
pub mod session;

pub use engine::{ReplayEngine, ReplayOptions, ReplayProgress};
pub use error::ReplayError;
pub use executor::{ExecutorError, PayloadEcho, ReplayExecutor};
pub use report::{EntryReplayDetail, MismatchSummary, ReplayResult, ReplayStatus};
pub use session::{IntegrityReport, ReplaySession};
