use crate::error::Result;
use crate::types::{Fact, FactId, FactQuery, LogEntry, Sequence, TxId};
use async_trait::async_trait;
use serde_json::Value;

/// Cooperative twin of [`FactStore`](crate::traits::FactStore)
///
/// Same contract, but every call may suspend. Futures must be `Send` so the
/// write saga can run on a spawned task.
#[async_trait]
pub trait AsyncFactStore: Send + Sync {
    async fn insert(&self, fact: &Fact) -> Result<FactId>;

    async fn update(&self, fact: &Fact) -> Result<()>;

    async fn delete(&self, id: &FactId) -> Result<()>;

    async fn get(&self, id: &FactId) -> Result<Option<Fact>>;

    async fn find_by_field(
        &self,
        fact_type: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<FactId>>;

    async fn list_current(&self, query: &FactQuery) -> Result<Vec<Fact>>;

    async fn append_log(&self, entry: &LogEntry) -> Result<()>;

    async fn list_log(&self, session_id: Option<&str>, limit: usize) -> Result<Vec<LogEntry>>;

    async fn remove_log(&self, tx_id: &TxId) -> Result<()>;

    async fn contains_log(&self, tx_id: &TxId) -> Result<bool>;

    async fn max_sequence(&self) -> Result<Sequence> {
        Ok(self
            .list_log(None, 1)
            .await?
            .first()
            .map(|e| e.sequence)
            .unwrap_or(0))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
