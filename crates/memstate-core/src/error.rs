use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemstateError {
    #[error("Validation failed for type '{fact_type}': {message}")]
    ValidationFailed { fact_type: String, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Hook '{hook}' failed on fact {fact_id}: {source}")]
    Hook {
        hook: String,
        fact_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Operation on fact {fact_id} was cancelled and compensated")]
    Cancelled { fact_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rollback stopped after reverting {reverted} entries: {source}")]
    PartialRollback {
        reverted: usize,
        #[source]
        source: Box<MemstateError>,
    },

    #[error("Model type '{0}' is not registered")]
    UnregisteredModel(String),

    #[error("Lock acquisition timed out after {timeout_ms}ms")]
    LockTimeout { timeout_ms: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl MemstateError {
    /// Shorthand for a validation failure on `fact_type`
    pub fn validation(fact_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            fact_type: fact_type.into(),
            message: message.into(),
        }
    }

    /// Number of entries reverted before a rollback stopped, if this is a partial rollback
    pub fn reverted(&self) -> Option<usize> {
        match self {
            Self::PartialRollback { reverted, .. } => Some(*reverted),
            _ => None,
        }
    }

    /// True when the store was left in its pre-operation state
    ///
    /// Validation, conflict, hook and cancellation failures are all raised
    /// before any write or after the write was compensated.
    pub fn is_compensated(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed { .. }
                | Self::Conflict(_)
                | Self::Hook { .. }
                | Self::Cancelled { .. }
                | Self::NotFound(_)
                | Self::UnregisteredModel(_)
                | Self::LockTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MemstateError>;

// Adapter errors:
//
// Storage adapters surface their own failures either as `MemstateError::Storage`
// or through `#[from] anyhow::Error`. The store never rewrites them into the
// validation/conflict/hook kinds, so callers can tell a failed backend apart
// from a rejected write.
