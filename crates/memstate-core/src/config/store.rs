use serde::{Deserialize, Serialize};

/// Whether rollback may revert writes on facts of an immutable type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImmutableRollback {
    /// Rollback restores any logged write (default).
    ///
    /// Immutability guards forward mutation through `commit`/`update`/`delete`;
    /// the undo history stays usable for every type.
    #[default]
    Allow,

    /// Rollback refuses to undo entries touching an immutable type.
    ///
    /// The refusal stops the rollback and is reported as a partial rollback
    /// wrapping a conflict.
    Deny,
}

/// Configuration for a memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Number of stripes for per-fact locking
    /// Default: 256
    #[serde(default = "default_stripe_count")]
    pub stripe_count: usize,

    /// Lock acquisition timeout in milliseconds (default: 5000)
    ///
    /// A write that cannot acquire its fact locks within this time fails
    /// with `LockTimeout` before touching the store.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Rollback policy for immutable types
    #[serde(default)]
    pub immutable_rollback: ImmutableRollback,

    /// Send inverse notifications to hooks that already accepted a write
    /// which was later compensated (default: true)
    ///
    /// Failures of these notifications are logged and otherwise ignored.
    #[serde(default = "default_true")]
    pub notify_compensation: bool,

    /// Upper bound for a single rollback request (default: 10,000)
    #[serde(default = "default_max_rollback_steps")]
    pub max_rollback_steps: usize,
}

fn default_stripe_count() -> usize {
    256
}

fn default_lock_timeout() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_max_rollback_steps() -> usize {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stripe_count: default_stripe_count(),
            lock_timeout_ms: default_lock_timeout(),
            immutable_rollback: ImmutableRollback::default(),
            notify_compensation: default_true(),
            max_rollback_steps: default_max_rollback_steps(),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stripe_count(mut self, stripe_count: usize) -> Self {
        self.stripe_count = stripe_count;
        self
    }

    /// Set lock acquisition timeout in milliseconds
    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn with_immutable_rollback(mut self, policy: ImmutableRollback) -> Self {
        self.immutable_rollback = policy;
        self
    }

    pub fn with_notify_compensation(mut self, enabled: bool) -> Self {
        self.notify_compensation = enabled;
        self
    }

    pub fn with_max_rollback_steps(mut self, steps: usize) -> Self {
        self.max_rollback_steps = steps;
        self
    }

    /// Reject configurations the store cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.stripe_count == 0 {
            return Err(crate::MemstateError::Config(
                "stripe_count must be positive".into(),
            ));
        }
        if self.max_rollback_steps == 0 {
            return Err(crate::MemstateError::Config(
                "max_rollback_steps must be positive".into(),
            ));
        }
        Ok(())
    }
}
