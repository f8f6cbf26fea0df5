use crate::tables::Tables;
use async_trait::async_trait;
use memstate_core::{
    AsyncFactStore, Fact, FactId, FactQuery, FactStore, LogEntry, Result, Sequence, TxId,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// In-memory fact store for threaded stores
///
/// Cloning yields another handle onto the same tables.
#[derive(Clone, Default)]
pub struct InMemoryFactStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Async handle sharing these tables
    pub fn to_async(&self) -> AsyncInMemoryFactStore {
        AsyncInMemoryFactStore {
            tables: self.tables.clone(),
        }
    }

    /// Number of live facts
    pub fn fact_count(&self) -> usize {
        self.tables.read().fact_count()
    }

    /// Number of log entries still present
    pub fn log_len(&self) -> usize {
        self.tables.read().log_len()
    }
}

impl FactStore for InMemoryFactStore {
    fn insert(&self, fact: &Fact) -> Result<FactId> {
        self.tables.write().insert(fact)
    }

    fn update(&self, fact: &Fact) -> Result<()> {
        self.tables.write().update(fact)
    }

    fn delete(&self, id: &FactId) -> Result<()> {
        self.tables.write().delete(id);
        Ok(())
    }

    fn get(&self, id: &FactId) -> Result<Option<Fact>> {
        Ok(self.tables.read().get(id))
    }

    fn find_by_field(
        &self,
        fact_type: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<FactId>> {
        Ok(self.tables.read().find_by_field(fact_type, field, value))
    }

    fn list_current(&self, query: &FactQuery) -> Result<Vec<Fact>> {
        Ok(self.tables.read().list_current(query))
    }

    fn append_log(&self, entry: &LogEntry) -> Result<()> {
        self.tables.write().append_log(entry)
    }

    fn list_log(&self, session_id: Option<&str>, limit: usize) -> Result<Vec<LogEntry>> {
        Ok(self.tables.read().list_log(session_id, limit))
    }

    fn remove_log(&self, tx_id: &TxId) -> Result<()> {
        self.tables.write().remove_log(tx_id);
        Ok(())
    }

    fn contains_log(&self, tx_id: &TxId) -> Result<bool> {
        Ok(self.tables.read().contains_log(tx_id))
    }

    fn max_sequence(&self) -> Result<Sequence> {
        Ok(self.tables.read().max_sequence())
    }

    fn close(&self) -> Result<()> {
        tracing::debug!("closing in-memory fact store");
        Ok(())
    }
}

/// In-memory fact store for cooperatively scheduled stores
///
/// No call suspends; the lock is never held across an await.
#[derive(Clone, Default)]
pub struct AsyncInMemoryFactStore {
    tables: Arc<RwLock<Tables>>,
}

impl AsyncInMemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sync handle sharing these tables
    pub fn to_sync(&self) -> InMemoryFactStore {
        InMemoryFactStore {
            tables: self.tables.clone(),
        }
    }

    pub fn fact_count(&self) -> usize {
        self.tables.read().fact_count()
    }

    pub fn log_len(&self) -> usize {
        self.tables.read().log_len()
    }
}

#[async_trait]
impl AsyncFactStore for AsyncInMemoryFactStore {
    async fn insert(&self, fact: &Fact) -> Result<FactId> {
        self.tables.write().insert(fact)
    }

    async fn update(&self, fact: &Fact) -> Result<()> {
        self.tables.write().update(fact)
    }

    async fn delete(&self, id: &FactId) -> Result<()> {
        self.tables.write().delete(id);
        Ok(())
    }

    async fn get(&self, id: &FactId) -> Result<Option<Fact>> {
        Ok(self.tables.read().get(id))
    }

    async fn find_by_field(
        &self,
        fact_type: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<FactId>> {
        Ok(self.tables.read().find_by_field(fact_type, field, value))
    }

    async fn list_current(&self, query: &FactQuery) -> Result<Vec<Fact>> {
        Ok(self.tables.read().list_current(query))
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<()> {
        self.tables.write().append_log(entry)
    }

    async fn list_log(&self, session_id: Option<&str>, limit: usize) -> Result<Vec<LogEntry>> {
        Ok(self.tables.read().list_log(session_id, limit))
    }

    async fn remove_log(&self, tx_id: &TxId) -> Result<()> {
        self.tables.write().remove_log(tx_id);
        Ok(())
    }

    async fn contains_log(&self, tx_id: &TxId) -> Result<bool> {
        Ok(self.tables.read().contains_log(tx_id))
    }

    async fn max_sequence(&self) -> Result<Sequence> {
        Ok(self.tables.read().max_sequence())
    }
}
