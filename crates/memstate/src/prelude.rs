//! memstate prelude
//!
//! ```
//! use memstate::prelude::*;
//! ```

// Core types
pub use crate::{
    Fact, FactId, FactQuery, LogEntry, MemstateError, OpKind, Payload, Result, ScoredFact,
    SearchHit, SearchRequest, TxId,
};

// Schema
pub use crate::{Constraint, SchemaRegistry, TypedValidator, Validator};

// Configs
pub use crate::{CommitOptions, ImmutableRollback, StoreConfig};

// Traits
pub use crate::{AsyncFactStore, AsyncHook, Change, FactStore, Hook};

// Stores
pub use crate::{
    AsyncInMemoryFactStore, AsyncMemoryStore, InMemoryFactStore, MemoryStore,
};

// Re-export common external deps
pub use anyhow;
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
