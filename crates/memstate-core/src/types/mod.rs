pub mod fact;
pub mod log;
pub mod query;

pub use fact::{Fact, FactId, Payload};
pub use log::{LogEntry, OpKind, Sequence, TxId};
pub use query::{FactQuery, ScoredFact, SearchHit, SearchRequest};
