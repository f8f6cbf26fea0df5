pub mod store;

pub use store::{ImmutableRollback, StoreConfig};
