use crate::types::{Fact, FactId, OpKind, SearchHit, SearchRequest};
use async_trait::async_trait;

/// A durable write, as seen by hooks
///
/// Hooks are only ever handed a `Change` after the primary store write has
/// completed, so the store side of a failed write is always known.
#[derive(Debug, Clone, Copy)]
pub struct Change<'a> {
    pub kind: OpKind,
    pub fact_id: &'a FactId,
    pub before: Option<&'a Fact>,
    pub after: Option<&'a Fact>,
}

impl<'a> Change<'a> {
    /// The fact state a secondary index should hold after this change
    ///
    /// `None` means the fact should be removed from the index.
    pub fn current(&self) -> Option<&'a Fact> {
        match self.kind {
            OpKind::Delete => None,
            OpKind::Insert | OpKind::Update => self.after,
        }
    }

    /// The inverse change, used to tell hooks a write was compensated
    pub fn inverse(&self) -> Change<'a> {
        Change {
            kind: self.kind.inverse(),
            fact_id: self.fact_id,
            before: self.after,
            after: self.before,
        }
    }
}

/// Synchronization target notified after every durable write
///
/// Implement this for secondary indices (vector stores, caches, search
/// engines). A returned error makes the store compensate the write and
/// surface `MemstateError::Hook` to the caller.
///
/// # Example
///
/// ```
/// use memstate_core::{Change, Hook};
///
/// struct AuditHook;
///
/// impl Hook for AuditHook {
///     fn name(&self) -> &str {
///         "audit"
///     }
///
///     fn on_write(&self, change: &Change<'_>) -> anyhow::Result<()> {
///         println!("{} {}", change.kind, change.fact_id);
///         Ok(())
///     }
/// }
/// ```
pub trait Hook: Send + Sync {
    /// Name used in errors and logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called in registration order after each durable write
    fn on_write(&self, change: &Change<'_>) -> anyhow::Result<()>;

    /// Semantic search over the index this hook maintains
    ///
    /// `None` means the hook does not support search.
    fn search(&self, _request: &SearchRequest) -> anyhow::Result<Option<Vec<SearchHit>>> {
        Ok(None)
    }
}

/// Cooperative twin of [`Hook`]
#[async_trait]
pub trait AsyncHook: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn on_write(&self, change: &Change<'_>) -> anyhow::Result<()>;

    async fn search(&self, _request: &SearchRequest) -> anyhow::Result<Option<Vec<SearchHit>>> {
        Ok(None)
    }
}
