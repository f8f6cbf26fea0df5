//! In-process fact store adapter
//!
//! Keeps facts and the operation log in memory behind a single
//! `parking_lot::RwLock`. Every call is atomic on its own, which is all the
//! store core requires from an adapter.
//!
//! Key features:
//! - Type index for singleton lookups and typed queries
//! - Log ordered by sequence, with a tx id index for surgical removal
//! - Sequence high-water mark that survives log removals
//! - Sync and async handles over the same tables

pub mod store;
mod tables;

pub use store::{AsyncInMemoryFactStore, InMemoryFactStore};
