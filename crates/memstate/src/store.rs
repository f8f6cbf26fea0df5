//! Threaded memory store
//!
//! # Example
//!
//! ```
//! use memstate::prelude::*;
//! use serde_json::json;
//!
//! let memory = MemoryStore::in_memory()?;
//! memory
//!     .registry()
//!     .register_constraint("user", Constraint::singleton("username"));
//!
//! let first = memory.commit(
//!     Fact::from_json("user", json!({"username": "neo", "level": 99}))?,
//!     CommitOptions::new(),
//! )?;
//! let second = memory.commit(
//!     Fact::from_json("user", json!({"username": "neo", "level": 0}))?,
//!     CommitOptions::new(),
//! )?;
//! assert_eq!(first, second);
//!
//! memory.rollback(1, None)?;
//! assert_eq!(memory.get(&first)?.unwrap().payload["level"], 99);
//! # Ok::<(), MemstateError>(())
//! ```

use crate::hooks::HookDispatcher;
use crate::options::CommitOptions;
use crate::saga::{self, StoreWrite, WritePlan};
use memstate_core::payload::merge;
use memstate_core::{
    observe, Fact, FactId, FactQuery, FactStore, Hook, LockManager, LogEntry, MemstateError,
    Payload, Result, SchemaRegistry, ScoredFact, SearchRequest, Sequence, StoreConfig, TxId,
};
use memstate_memory::InMemoryFactStore;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Builder for [`MemoryStore`]
pub struct MemoryStoreBuilder {
    store: Arc<dyn FactStore>,
    registry: Option<Arc<SchemaRegistry>>,
    hooks: Vec<Arc<dyn Hook>>,
    config: StoreConfig,
}

impl MemoryStoreBuilder {
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self {
            store,
            registry: None,
            hooks: Vec::new(),
            config: StoreConfig::default(),
        }
    }

    /// Share a schema registry (a fresh one is created otherwise)
    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register a hook; hooks are called in the order they are added
    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the store
    ///
    /// The sequence counter resumes after the highest sequence the adapter
    /// has logged.
    pub fn build(self) -> Result<MemoryStore> {
        self.config.validate()?;
        let sequence = self.store.max_sequence()?;
        let hooks = HookDispatcher::new();
        for hook in self.hooks {
            hooks.register(hook);
        }
        tracing::debug!(
            sequence,
            stripes = self.config.stripe_count,
            "memory store opened"
        );
        Ok(MemoryStore {
            store: self.store,
            registry: self.registry.unwrap_or_default(),
            hooks,
            locks: LockManager::new(
                self.config.stripe_count,
                Duration::from_millis(self.config.lock_timeout_ms),
            ),
            config: self.config,
            sequence: AtomicU64::new(sequence),
            rollback_gate: Mutex::new(()),
        })
    }
}

/// Transactional facade over a fact store and its hooks
///
/// Every mutation runs under the stripe locks of the fact it touches (plus
/// the type lock for singleton types). Reads go straight to the store.
pub struct MemoryStore {
    store: Arc<dyn FactStore>,
    registry: Arc<SchemaRegistry>,
    hooks: HookDispatcher,
    locks: LockManager,
    config: StoreConfig,
    sequence: AtomicU64,
    rollback_gate: Mutex<()>,
}

impl MemoryStore {
    pub fn builder(store: Arc<dyn FactStore>) -> MemoryStoreBuilder {
        MemoryStoreBuilder::new(store)
    }

    /// Store backed by a fresh in-process adapter
    pub fn in_memory() -> Result<Self> {
        Self::builder(Arc::new(InMemoryFactStore::new())).build()
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn fact_store(&self) -> &Arc<dyn FactStore> {
        &self.store
    }

    pub fn add_hook(&self, hook: Arc<dyn Hook>) {
        self.hooks.register(hook);
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Commit a complete fact document
    ///
    /// Resolves to an INSERT, or to an UPDATE when the fact's id already
    /// exists or a singleton constraint matches an existing fact.
    pub fn commit(&self, fact: Fact, options: CommitOptions) -> Result<FactId> {
        self.commit_inner(fact, options, false)
    }

    /// Commit a typed model registered with `SchemaRegistry::register_model`
    ///
    /// An explicit `fact_id` forces UPDATE semantics and must exist.
    pub fn commit_model<T: Serialize + 'static>(
        &self,
        model: &T,
        fact_id: Option<FactId>,
        options: CommitOptions,
    ) -> Result<FactId> {
        let fact_type = self.registry.type_of_model::<T>()?;
        let fact = Fact::from_json(fact_type, serde_json::to_value(model)?)?;
        match fact_id {
            Some(id) => self.commit_inner(fact.with_id(id), options, true),
            None => self.commit_inner(fact, options, false),
        }
    }

    fn commit_inner(
        &self,
        fact: Fact,
        options: CommitOptions,
        require_existing: bool,
    ) -> Result<FactId> {
        let resolved = self.registry.resolve(&fact.fact_type);
        let payload = resolved.validate(&fact.fact_type, &fact.payload)?;

        let keys = saga::lock_keys(&fact.id, &fact.fact_type, &resolved);
        let _guard = self.locks.acquire_keys(&keys)?;

        let own = self.store.get(&fact.id)?;
        if require_existing && own.is_none() {
            return Err(MemstateError::NotFound(fact.id.to_string()));
        }
        let matched = match saga::singleton_value(&resolved, &payload) {
            Some((key, value)) => self.store.find_by_field(&fact.fact_type, key, value)?,
            None => None,
        };
        let target =
            match saga::resolve_commit_target(&fact.id, own.is_some(), matched, &fact.fact_type)? {
                Some(id) if id == fact.id => own,
                Some(id) => self.store.get(&id)?,
                None => None,
            };

        let plan = saga::plan_commit(fact, payload, &resolved, target, &options)?;
        self.execute(plan)
    }

    /// Patch an existing fact (shallow top-level merge)
    ///
    /// The merged payload is validated before anything is written.
    pub fn update(&self, fact_id: &FactId, patch: Payload, options: CommitOptions) -> Result<()> {
        let current = self.require(fact_id)?;
        let resolved = self.registry.resolve(&current.fact_type);
        let keys = saga::lock_keys(fact_id, &current.fact_type, &resolved);
        let _guard = self.locks.acquire_keys(&keys)?;

        let before = self.require(fact_id)?;
        let merged = resolved.validate(&before.fact_type, &merge(&before.payload, &patch))?;
        let clash = match saga::singleton_value(&resolved, &merged) {
            Some((key, value)) => self.store.find_by_field(&before.fact_type, key, value)?,
            None => None,
        };

        let plan = saga::plan_update(before, merged, &resolved, clash, &options)?;
        self.execute(plan).map(|_| ())
    }

    /// Delete a fact
    pub fn delete(&self, fact_id: &FactId, options: CommitOptions) -> Result<()> {
        let current = self.require(fact_id)?;
        let resolved = self.registry.resolve(&current.fact_type);
        let keys = saga::lock_keys(fact_id, &current.fact_type, &resolved);
        let _guard = self.locks.acquire_keys(&keys)?;

        let before = self.require(fact_id)?;
        let plan = saga::plan_delete(before, &resolved, &options)?;
        self.execute(plan).map(|_| ())
    }

    pub fn get(&self, fact_id: &FactId) -> Result<Option<Fact>> {
        self.store.get(fact_id)
    }

    pub fn query(&self, query: &FactQuery) -> Result<Vec<Fact>> {
        self.store.list_current(query)
    }

    /// Operation log in scope, most recent first
    pub fn history(&self, session_id: Option<&str>, limit: usize) -> Result<Vec<LogEntry>> {
        self.store.list_log(session_id, limit)
    }

    /// Semantic search through search-capable hooks
    ///
    /// Hits whose fact is gone from the primary store are dropped.
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredFact>> {
        let filter = FactQuery {
            filters: request.filters.clone(),
            ..FactQuery::new()
        };
        let mut results = Vec::new();
        for hit in self.hooks.search(request)? {
            if results.len() >= request.limit {
                break;
            }
            match self.store.get(&hit.fact_id)? {
                Some(fact) if filter.matches(&fact) => results.push(ScoredFact {
                    fact,
                    score: hit.score,
                }),
                Some(_) => {}
                None => tracing::debug!(fact_id = %hit.fact_id, "dropping search hit for missing fact"),
            }
        }
        Ok(results)
    }

    /// Move a session's facts into global scope
    ///
    /// Each promotion is its own logged UPDATE under `session_id`. Returns
    /// the promoted ids; on error, promotions already done stay in place.
    pub fn promote_session(
        &self,
        session_id: &str,
        selector: Option<&FactQuery>,
        options: CommitOptions,
    ) -> Result<Vec<FactId>> {
        let mut promoted = Vec::new();
        for candidate in self.session_facts(session_id, selector)? {
            let resolved = self.registry.resolve(&candidate.fact_type);
            let keys = saga::lock_keys(&candidate.id, &candidate.fact_type, &resolved);
            let _guard = self.locks.acquire_keys(&keys)?;

            let Some(current) = self.owned_by(&candidate.id, session_id)? else {
                continue;
            };
            let plan = saga::plan_promote(current, session_id, &options);
            promoted.push(self.execute(plan)?);
        }
        tracing::info!(session_id, promoted = promoted.len(), "session promoted");
        Ok(promoted)
    }

    /// Delete every fact owned by a session, one logged DELETE each
    pub fn discard_session(&self, session_id: &str, options: CommitOptions) -> Result<usize> {
        let options = CommitOptions {
            session_id: Some(session_id.to_string()),
            ..options
        };
        let mut discarded = 0;
        for candidate in self.session_facts(session_id, None)? {
            let resolved = self.registry.resolve(&candidate.fact_type);
            let keys = saga::lock_keys(&candidate.id, &candidate.fact_type, &resolved);
            let _guard = self.locks.acquire_keys(&keys)?;

            let Some(current) = self.owned_by(&candidate.id, session_id)? else {
                continue;
            };
            self.execute(saga::plan_removal(current, &options))?;
            discarded += 1;
        }
        tracing::info!(session_id, discarded, "session discarded");
        Ok(discarded)
    }

    /// Undo up to `steps` of the most recent log entries in scope
    ///
    /// Returns how many entries were undone. A failure part-way stops the
    /// rollback and reports `PartialRollback` with the count undone so far;
    /// the failing entry stays in the log.
    pub fn rollback(&self, steps: usize, session_id: Option<&str>) -> Result<usize> {
        let steps = steps.min(self.config.max_rollback_steps);
        if steps == 0 {
            return Ok(0);
        }
        let _gate = self.rollback_gate.lock();

        let entries = self.store.list_log(session_id, steps)?;
        let mut reverted = 0;
        for entry in &entries {
            match self.undo(entry) {
                Ok(true) => reverted += 1,
                Ok(false) => {}
                Err(e) => {
                    observe::record_rollback(reverted, true);
                    tracing::warn!(reverted, tx_id = %entry.tx_id, error = %e, "rollback stopped");
                    return Err(saga::partial(reverted, e));
                }
            }
        }

        observe::record_rollback(reverted, false);
        tracing::info!(reverted, session_id = ?session_id, "rollback complete");
        Ok(reverted)
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    /// Undo one entry; `false` if another rollback consumed it first
    fn undo(&self, entry: &LogEntry) -> Result<bool> {
        let fact_type = entry.fact_type().unwrap_or_default();
        let resolved = self.registry.resolve(fact_type);
        let keys = saga::lock_keys(&entry.fact_id, fact_type, &resolved);
        let _guard = self.locks.acquire_keys(&keys)?;

        if !self.store.contains_log(&entry.tx_id)? {
            return Ok(false);
        }
        saga::check_undo_policy(entry, &resolved, self.config.immutable_rollback)?;

        let plan = saga::plan_undo(entry);
        apply(self.store.as_ref(), plan.forward().relaxed())?;

        let change = plan.change();
        let report = self.hooks.dispatch(&change);
        if let Some(failure) = report.failure {
            tracing::warn!(
                tx_id = %entry.tx_id,
                hook = %failure.hook,
                "hook failed during rollback, re-applying entry"
            );
            if let Err(e) = apply(self.store.as_ref(), plan.compensation().relaxed()) {
                tracing::error!(tx_id = %entry.tx_id, error = %e, "failed to re-apply entry");
                return Err(e);
            }
            if self.config.notify_compensation {
                HookDispatcher::notify_compensation(&report.accepted, &change);
            }
            return Err(failure.into_error(&plan.fact_id));
        }

        self.store.remove_log(&entry.tx_id)?;
        tracing::debug!(tx_id = %entry.tx_id, kind = %entry.kind, "entry rolled back");
        Ok(true)
    }

    /// Write, log, notify; compensate on failure
    fn execute(&self, plan: WritePlan) -> Result<FactId> {
        let started = Instant::now();
        tracing::debug!(fact_id = %plan.fact_id, kind = %plan.kind, "applying write");
        apply(self.store.as_ref(), plan.forward())?;

        let entry = plan.log_entry(TxId::generate(), self.next_sequence());
        if let Err(e) = self.store.append_log(&entry) {
            tracing::warn!(fact_id = %plan.fact_id, error = %e, "log append failed, compensating");
            if let Err(restore_err) = self.restore(&plan) {
                tracing::error!(
                    fact_id = %plan.fact_id,
                    error = %restore_err,
                    "compensation write failed, unlogged write left in store"
                );
            }
            observe::record_compensation(plan.kind);
            return Err(e);
        }

        let change = plan.change();
        let report = self.hooks.dispatch(&change);
        if let Some(failure) = report.failure {
            tracing::warn!(
                fact_id = %plan.fact_id,
                hook = %failure.hook,
                "hook failed, compensating write"
            );
            // the write stays logged so rollback can still undo it
            if let Err(e) = self.restore(&plan) {
                tracing::error!(
                    fact_id = %plan.fact_id,
                    tx_id = %entry.tx_id,
                    hook = %failure.hook,
                    error = %e,
                    "compensation write failed, write kept in log"
                );
                return Err(e);
            }
            let unlogged = self.store.remove_log(&entry.tx_id);
            if self.config.notify_compensation {
                HookDispatcher::notify_compensation(&report.accepted, &change);
            }
            observe::record_compensation(plan.kind);
            if let Err(e) = unlogged {
                tracing::error!(tx_id = %entry.tx_id, error = %e, "failed to remove compensated log entry");
                return Err(e);
            }
            return Err(failure.into_error(&plan.fact_id));
        }

        observe::record_commit(started.elapsed(), plan.kind);
        Ok(plan.fact_id)
    }

    fn restore(&self, plan: &WritePlan) -> Result<()> {
        apply(self.store.as_ref(), plan.compensation())
    }

    fn next_sequence(&self) -> Sequence {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn require(&self, fact_id: &FactId) -> Result<Fact> {
        self.store
            .get(fact_id)?
            .ok_or_else(|| MemstateError::NotFound(fact_id.to_string()))
    }

    fn session_facts(&self, session_id: &str, selector: Option<&FactQuery>) -> Result<Vec<Fact>> {
        let mut facts = self
            .store
            .list_current(&FactQuery::new().in_session(session_id))?;
        if let Some(selector) = selector {
            facts.retain(|fact| selector.matches(fact));
        }
        Ok(facts)
    }

    /// Re-read a fact under its lock, if it still belongs to `session_id`
    fn owned_by(&self, fact_id: &FactId, session_id: &str) -> Result<Option<Fact>> {
        Ok(self
            .store
            .get(fact_id)?
            .filter(|fact| fact.session_id.as_deref() == Some(session_id)))
    }
}

fn apply(store: &dyn FactStore, write: StoreWrite<'_>) -> Result<()> {
    match write {
        StoreWrite::Insert(fact) => store.insert(fact).map(|_| ()),
        StoreWrite::Replace(fact) => store.update(fact),
        StoreWrite::Remove(id) => store.delete(id),
        StoreWrite::Restore(fact) => match store.get(&fact.id)? {
            Some(_) => store.update(fact),
            None => store.insert(fact).map(|_| ()),
        },
    }
}
