//! memstate: transactional facts with compensating hooks
//!
//! Treats a structured fact store and any number of secondary indices
//! (vector stores, caches, search engines) as one transactional unit:
//! - **Commit**: validate, resolve constraints, write, log, notify hooks
//! - **Compensation**: a failed hook undoes the store write and its log entry
//! - **Rollback**: surgical, session-scoped undo of logged writes
//! - **Two modes**: [`MemoryStore`] on threads, [`AsyncMemoryStore`] on tokio
//!
//! # Quick Start
//!
//! ```
//! use memstate::prelude::*;
//! use serde_json::json;
//!
//! # fn main() -> Result<()> {
//! let memory = MemoryStore::in_memory()?;
//!
//! let id = memory.commit(
//!     Fact::from_json("pref", json!({"content": "vegetarian"}))?,
//!     CommitOptions::new().with_session("chat-1"),
//! )?;
//! memory.commit(
//!     Fact::from_json("pref", json!({"content": "steak"}))?.with_id(id.clone()),
//!     CommitOptions::new().with_session("chat-1"),
//! )?;
//!
//! // undo the last write of this session
//! memory.rollback(1, Some("chat-1"))?;
//! assert_eq!(memory.get(&id)?.unwrap().payload["content"], "vegetarian");
//! # Ok(())
//! # }
//! ```

pub mod async_store;
pub mod hooks;
pub mod options;
pub mod prelude;
mod saga;
pub mod store;

// Re-export core types
pub use memstate_core::{
    config::{ImmutableRollback, StoreConfig},
    error::{MemstateError, Result},
    payload,
    schema::{Constraint, Resolved, SchemaRegistry},
    traits::{AsyncFactStore, AsyncHook, Change, FactStore, Hook, TypedValidator, Validator},
    types::{
        Fact, FactId, FactQuery, LogEntry, OpKind, Payload, ScoredFact, SearchHit, SearchRequest,
        Sequence, TxId,
    },
};

// Re-export the in-process adapter
pub use memstate_memory::{AsyncInMemoryFactStore, InMemoryFactStore};

// Re-export main types from this crate
pub use async_store::{AsyncMemoryStore, AsyncMemoryStoreBuilder};
pub use hooks::{AsyncHookDispatcher, HookDispatcher};
pub use options::CommitOptions;
pub use store::{MemoryStore, MemoryStoreBuilder};
