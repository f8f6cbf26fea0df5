//! memstate core: traits and types for the fact store consistency layer
//!
//! This crate defines the abstractions shared by the store facade and its
//! adapters:
//! - Fact store capability: CRUD over facts plus an append-only operation log
//! - Hooks: secondary synchronization targets notified after durable writes
//! - Schema registry: per-type validators and constraints
//! - Stripe locking: per-fact exclusion for threaded and cooperative modes

pub mod config;
pub mod error;
pub mod lock_manager;
pub mod observe;
pub mod payload;
pub mod schema;
pub mod traits;
pub mod types;

pub use config::{ImmutableRollback, StoreConfig};
pub use error::{MemstateError, Result};
pub use lock_manager::{AsyncLockManager, LockManager, MultiLockGuard, OwnedMultiLockGuard};
pub use schema::{Constraint, Resolved, SchemaRegistry};
pub use traits::{AsyncFactStore, AsyncHook, Change, FactStore, Hook, TypedValidator, Validator};
pub use types::{
    Fact, FactId, FactQuery, LogEntry, OpKind, Payload, ScoredFact, SearchHit, SearchRequest,
    Sequence, TxId,
};
