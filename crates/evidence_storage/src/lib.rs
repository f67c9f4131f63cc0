//! Durable evidence storage.
//!
//! An append-only log of evidence entries in SQLite (WAL mode), with typed
//! query criteria, atomic batch appends, reverse relation lookup, chain
//! reconstruction and in-process subscriptions.

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod pool;
pub mod query;
pub mod row;
pub mod schema;
pub mod store;
pub mod subscription;

pub use config::{StoreConfig, SyncMode};
pub use error::{StoreError, StoreResult};
pub use query::{EvidenceQuery, OrderDirection, OrderField};
pub use store::EvidenceStore;
pub use subscription::{
    SubscriberError, SubscriberResult, SubscriptionBus, SubscriptionFilter, SubscriptionId,
};
