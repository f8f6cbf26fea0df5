use crate::error::Result;
use crate::types::{Fact, FactId, FactQuery, LogEntry, Sequence, TxId};
use serde_json::Value;

/// Primary fact store: CRUD over facts plus the operation log
///
/// Implemented by storage adapters. The store core calls these methods
/// while holding the per-fact lock, so an adapter only needs each single
/// call to be atomic on its own (a local transaction is enough).
///
/// Adapter failures should be reported as `MemstateError::Storage` (or any
/// error converted through `anyhow`); they are propagated to callers
/// unchanged.
pub trait FactStore: Send + Sync {
    /// Persist a new fact record and return its id
    ///
    /// The id is taken from the record; adapters must not reissue ids.
    fn insert(&self, fact: &Fact) -> Result<FactId>;

    /// Overwrite an existing fact record
    fn update(&self, fact: &Fact) -> Result<()>;

    /// Remove a fact (no-op if it does not exist)
    fn delete(&self, id: &FactId) -> Result<()>;

    /// Load a fact by id
    fn get(&self, id: &FactId) -> Result<Option<Fact>>;

    /// Singleton lookup: id of the fact of `fact_type` whose payload `field` equals `value`
    fn find_by_field(&self, fact_type: &str, field: &str, value: &Value)
        -> Result<Option<FactId>>;

    /// Current facts matching a query
    fn list_current(&self, query: &FactQuery) -> Result<Vec<Fact>>;

    /// Append an operation log entry
    fn append_log(&self, entry: &LogEntry) -> Result<()>;

    /// Log entries in scope, most recent (highest sequence) first
    ///
    /// `session_id = None` lists every session.
    fn list_log(&self, session_id: Option<&str>, limit: usize) -> Result<Vec<LogEntry>>;

    /// Remove one log entry by identity
    fn remove_log(&self, tx_id: &TxId) -> Result<()>;

    /// Whether a log entry is still present
    fn contains_log(&self, tx_id: &TxId) -> Result<bool>;

    /// Highest sequence ever logged (0 when the log is empty)
    ///
    /// Default implementation reads the newest entry; adapters that keep a
    /// high-water mark should override it so removed entries are accounted for.
    fn max_sequence(&self) -> Result<Sequence> {
        Ok(self
            .list_log(None, 1)?
            .first()
            .map(|e| e.sequence)
            .unwrap_or(0))
    }

    /// Close the store
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
