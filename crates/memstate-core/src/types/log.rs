use crate::types::fact::{Fact, FactId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic operation sequence number
///
/// Ordering of the log uses this, never wall-clock time.
pub type Sequence = u64;

/// Identity of a single log entry, used for surgical removal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Kind of write recorded in the operation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpKind {
    Insert,
    Update,
    Delete,
}

impl OpKind {
    /// Kind a hook observes when this operation is undone
    pub fn inverse(self) -> Self {
        match self {
            OpKind::Insert => OpKind::Delete,
            OpKind::Update => OpKind::Update,
            OpKind::Delete => OpKind::Insert,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Insert => "INSERT",
            OpKind::Update => "UPDATE",
            OpKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation log entry
///
/// Immutable once appended. The only mutation is whole-entry removal,
/// performed by rollback exactly once per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub tx_id: TxId,
    pub sequence: Sequence,
    pub fact_id: FactId,
    pub kind: OpKind,

    /// Snapshot before the write (absent for INSERT)
    pub before: Option<Fact>,

    /// Snapshot after the write (absent for DELETE)
    pub after: Option<Fact>,

    /// Session scope the operation was issued under
    pub session_id: Option<String>,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LogEntry {
    /// Type of the fact this entry touched
    pub fn fact_type(&self) -> Option<&str> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(|f| f.fact_type.as_str())
    }

    /// Whether the entry belongs to `scope` (`None` matches every session)
    pub fn in_scope(&self, scope: Option<&str>) -> bool {
        match scope {
            None => true,
            Some(session) => self.session_id.as_deref() == Some(session),
        }
    }
}
