//! Cooperatively scheduled memory store
//!
//! Same protocol as [`MemoryStore`](crate::MemoryStore), but store calls and
//! hook calls are suspend points. Each mutation runs on its own spawned
//! task that owns the fact locks, so dropping the caller's future cannot
//! interrupt a write half-way: the task notices the caller is gone at the
//! next hook call, compensates, and finishes with `Cancelled`.

use crate::hooks::{AsyncHookDispatcher, CancelWatch};
use crate::options::CommitOptions;
use crate::saga::{self, StoreWrite, WritePlan};
use memstate_core::payload::merge;
use memstate_core::{
    observe, AsyncFactStore, AsyncHook, AsyncLockManager, Fact, FactId, FactQuery, LogEntry,
    MemstateError, Payload, Result, SchemaRegistry, ScoredFact, SearchRequest, Sequence,
    StoreConfig, TxId,
};
use memstate_memory::AsyncInMemoryFactStore;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Builder for [`AsyncMemoryStore`]
pub struct AsyncMemoryStoreBuilder {
    store: Arc<dyn AsyncFactStore>,
    registry: Option<Arc<SchemaRegistry>>,
    hooks: Vec<Arc<dyn AsyncHook>>,
    config: StoreConfig,
}

impl AsyncMemoryStoreBuilder {
    pub fn new(store: Arc<dyn AsyncFactStore>) -> Self {
        Self {
            store,
            registry: None,
            hooks: Vec::new(),
            config: StoreConfig::default(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn AsyncHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn build(self) -> Result<AsyncMemoryStore> {
        self.config.validate()?;
        let sequence = self.store.max_sequence().await?;
        let hooks = AsyncHookDispatcher::new();
        for hook in self.hooks {
            hooks.register(hook);
        }
        tracing::debug!(
            sequence,
            stripes = self.config.stripe_count,
            "async memory store opened"
        );
        Ok(AsyncMemoryStore {
            inner: Arc::new(Inner {
                store: self.store,
                registry: self.registry.unwrap_or_default(),
                hooks,
                locks: AsyncLockManager::new(
                    self.config.stripe_count,
                    Duration::from_millis(self.config.lock_timeout_ms),
                ),
                config: self.config,
                sequence: AtomicU64::new(sequence),
                rollback_gate: tokio::sync::Mutex::new(()),
            }),
        })
    }
}

/// Cooperative transactional facade
///
/// Cheap to clone; clones share the same store, hooks and locks.
#[derive(Clone)]
pub struct AsyncMemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn AsyncFactStore>,
    registry: Arc<SchemaRegistry>,
    hooks: AsyncHookDispatcher,
    locks: AsyncLockManager,
    config: StoreConfig,
    sequence: AtomicU64,
    rollback_gate: tokio::sync::Mutex<()>,
}

impl AsyncMemoryStore {
    pub fn builder(store: Arc<dyn AsyncFactStore>) -> AsyncMemoryStoreBuilder {
        AsyncMemoryStoreBuilder::new(store)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::builder(Arc::new(AsyncInMemoryFactStore::new()))
            .build()
            .await
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn fact_store(&self) -> &Arc<dyn AsyncFactStore> {
        &self.inner.store
    }

    pub fn add_hook(&self, hook: Arc<dyn AsyncHook>) {
        self.inner.hooks.register(hook);
    }

    pub fn hook_count(&self) -> usize {
        self.inner.hooks.len()
    }

    pub async fn commit(&self, fact: Fact, options: CommitOptions) -> Result<FactId> {
        self.run_guarded(move |inner, mut cancel| async move {
            inner.commit_inner(fact, options, false, &mut cancel).await
        })
        .await
    }

    pub async fn commit_model<T: Serialize + 'static>(
        &self,
        model: &T,
        fact_id: Option<FactId>,
        options: CommitOptions,
    ) -> Result<FactId> {
        let fact_type = self.inner.registry.type_of_model::<T>()?;
        let fact = Fact::from_json(fact_type, serde_json::to_value(model)?)?;
        let (fact, require_existing) = match fact_id {
            Some(id) => (fact.with_id(id), true),
            None => (fact, false),
        };
        self.run_guarded(move |inner, mut cancel| async move {
            inner
                .commit_inner(fact, options, require_existing, &mut cancel)
                .await
        })
        .await
    }

    pub async fn update(
        &self,
        fact_id: &FactId,
        patch: Payload,
        options: CommitOptions,
    ) -> Result<()> {
        let fact_id = fact_id.clone();
        self.run_guarded(move |inner, mut cancel| async move {
            inner.update_inner(&fact_id, patch, options, &mut cancel).await
        })
        .await
    }

    pub async fn delete(&self, fact_id: &FactId, options: CommitOptions) -> Result<()> {
        let fact_id = fact_id.clone();
        self.run_guarded(move |inner, mut cancel| async move {
            inner.delete_inner(&fact_id, options, &mut cancel).await
        })
        .await
    }

    pub async fn get(&self, fact_id: &FactId) -> Result<Option<Fact>> {
        self.inner.store.get(fact_id).await
    }

    pub async fn query(&self, query: &FactQuery) -> Result<Vec<Fact>> {
        self.inner.store.list_current(query).await
    }

    pub async fn history(&self, session_id: Option<&str>, limit: usize) -> Result<Vec<LogEntry>> {
        self.inner.store.list_log(session_id, limit).await
    }

    /// Semantic search through search-capable hooks, ghosts dropped
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredFact>> {
        let filter = FactQuery {
            filters: request.filters.clone(),
            ..FactQuery::new()
        };
        let mut results = Vec::new();
        for hit in self.inner.hooks.search(request).await? {
            if results.len() >= request.limit {
                break;
            }
            match self.inner.store.get(&hit.fact_id).await? {
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

    pub async fn promote_session(
        &self,
        session_id: &str,
        selector: Option<&FactQuery>,
        options: CommitOptions,
    ) -> Result<Vec<FactId>> {
        let session_id = session_id.to_string();
        let selector = selector.cloned();
        self.run_guarded(move |inner, mut cancel| async move {
            inner
                .promote_inner(&session_id, selector.as_ref(), options, &mut cancel)
                .await
        })
        .await
    }

    pub async fn discard_session(&self, session_id: &str, options: CommitOptions) -> Result<usize> {
        let session_id = session_id.to_string();
        self.run_guarded(move |inner, mut cancel| async move {
            inner.discard_inner(&session_id, options, &mut cancel).await
        })
        .await
    }

    /// Undo up to `steps` of the most recent log entries in scope
    ///
    /// Runs to completion on its own task even if the caller stops waiting.
    pub async fn rollback(&self, steps: usize, session_id: Option<&str>) -> Result<usize> {
        let session_id = session_id.map(str::to_string);
        self.run_guarded(move |inner, _cancel| async move {
            inner.rollback_inner(steps, session_id.as_deref()).await
        })
        .await
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.store.close().await
    }

    /// Run `op` on a spawned task tied to this call's cancel watch
    async fn run_guarded<T, F, Fut>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Inner>, CancelWatch) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (caller, watch) = CancelWatch::pair();
        let handle = tokio::spawn(op(self.inner.clone(), watch));
        let joined = handle.await;
        drop(caller);
        joined.map_err(|e| MemstateError::Other(anyhow::anyhow!("store task failed: {}", e)))?
    }
}

impl Inner {
    async fn commit_inner(
        &self,
        fact: Fact,
        options: CommitOptions,
        require_existing: bool,
        cancel: &mut CancelWatch,
    ) -> Result<FactId> {
        if cancel.is_cancelled() {
            return Err(MemstateError::Cancelled {
                fact_id: fact.id.to_string(),
            });
        }
        let resolved = self.registry.resolve(&fact.fact_type);
        let payload = resolved.validate(&fact.fact_type, &fact.payload)?;

        let keys = saga::lock_keys(&fact.id, &fact.fact_type, &resolved);
        let _guard = self.locks.acquire_keys(&keys).await?;

        let own = self.store.get(&fact.id).await?;
        if require_existing && own.is_none() {
            return Err(MemstateError::NotFound(fact.id.to_string()));
        }
        let matched = match saga::singleton_value(&resolved, &payload) {
            Some((key, value)) => {
                self.store
                    .find_by_field(&fact.fact_type, key, value)
                    .await?
            }
            None => None,
        };
        let target =
            match saga::resolve_commit_target(&fact.id, own.is_some(), matched, &fact.fact_type)? {
                Some(id) if id == fact.id => own,
                Some(id) => self.store.get(&id).await?,
                None => None,
            };

        let plan = saga::plan_commit(fact, payload, &resolved, target, &options)?;
        self.execute(plan, cancel).await
    }

    async fn update_inner(
        &self,
        fact_id: &FactId,
        patch: Payload,
        options: CommitOptions,
        cancel: &mut CancelWatch,
    ) -> Result<()> {
        let current = self.require(fact_id).await?;
        let resolved = self.registry.resolve(&current.fact_type);
        let keys = saga::lock_keys(fact_id, &current.fact_type, &resolved);
        let _guard = self.locks.acquire_keys(&keys).await?;

        let before = self.require(fact_id).await?;
        let merged = resolved.validate(&before.fact_type, &merge(&before.payload, &patch))?;
        let clash = match saga::singleton_value(&resolved, &merged) {
            Some((key, value)) => {
                self.store
                    .find_by_field(&before.fact_type, key, value)
                    .await?
            }
            None => None,
        };

        let plan = saga::plan_update(before, merged, &resolved, clash, &options)?;
        self.execute(plan, cancel).await.map(|_| ())
    }

    async fn delete_inner(
        &self,
        fact_id: &FactId,
        options: CommitOptions,
        cancel: &mut CancelWatch,
    ) -> Result<()> {
        let current = self.require(fact_id).await?;
        let resolved = self.registry.resolve(&current.fact_type);
        let keys = saga::lock_keys(fact_id, &current.fact_type, &resolved);
        let _guard = self.locks.acquire_keys(&keys).await?;

        let before = self.require(fact_id).await?;
        let plan = saga::plan_delete(before, &resolved, &options)?;
        self.execute(plan, cancel).await.map(|_| ())
    }

    async fn promote_inner(
        &self,
        session_id: &str,
        selector: Option<&FactQuery>,
        options: CommitOptions,
        cancel: &mut CancelWatch,
    ) -> Result<Vec<FactId>> {
        let mut promoted = Vec::new();
        for candidate in self.session_facts(session_id, selector).await? {
            if cancel.is_cancelled() {
                return Err(MemstateError::Cancelled {
                    fact_id: candidate.id.to_string(),
                });
            }
            let resolved = self.registry.resolve(&candidate.fact_type);
            let keys = saga::lock_keys(&candidate.id, &candidate.fact_type, &resolved);
            let _guard = self.locks.acquire_keys(&keys).await?;

            let Some(current) = self.owned_by(&candidate.id, session_id).await? else {
                continue;
            };
            let plan = saga::plan_promote(current, session_id, &options);
            promoted.push(self.execute(plan, cancel).await?);
        }
        tracing::info!(session_id, promoted = promoted.len(), "session promoted");
        Ok(promoted)
    }

    async fn discard_inner(
        &self,
        session_id: &str,
        options: CommitOptions,
        cancel: &mut CancelWatch,
    ) -> Result<usize> {
        let options = CommitOptions {
            session_id: Some(session_id.to_string()),
            ..options
        };
        let mut discarded = 0;
        for candidate in self.session_facts(session_id, None).await? {
            if cancel.is_cancelled() {
                return Err(MemstateError::Cancelled {
                    fact_id: candidate.id.to_string(),
                });
            }
            let resolved = self.registry.resolve(&candidate.fact_type);
            let keys = saga::lock_keys(&candidate.id, &candidate.fact_type, &resolved);
            let _guard = self.locks.acquire_keys(&keys).await?;

            let Some(current) = self.owned_by(&candidate.id, session_id).await? else {
                continue;
            };
            self.execute(saga::plan_removal(current, &options), cancel)
                .await?;
            discarded += 1;
        }
        tracing::info!(session_id, discarded, "session discarded");
        Ok(discarded)
    }

    async fn rollback_inner(&self, steps: usize, session_id: Option<&str>) -> Result<usize> {
        let steps = steps.min(self.config.max_rollback_steps);
        if steps == 0 {
            return Ok(0);
        }
        let _gate = self.rollback_gate.lock().await;

        let entries = self.store.list_log(session_id, steps).await?;
        let mut reverted = 0;
        for entry in &entries {
            match self.undo(entry).await {
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

    async fn undo(&self, entry: &LogEntry) -> Result<bool> {
        let fact_type = entry.fact_type().unwrap_or_default();
        let resolved = self.registry.resolve(fact_type);
        let keys = saga::lock_keys(&entry.fact_id, fact_type, &resolved);
        let _guard = self.locks.acquire_keys(&keys).await?;

        if !self.store.contains_log(&entry.tx_id).await? {
            return Ok(false);
        }
        saga::check_undo_policy(entry, &resolved, self.config.immutable_rollback)?;

        let plan = saga::plan_undo(entry);
        apply(self.store.as_ref(), plan.forward().relaxed()).await?;

        let change = plan.change();
        let report = self.hooks.dispatch(&change, &mut CancelWatch::never()).await;
        if let Some(failure) = report.failure {
            tracing::warn!(
                tx_id = %entry.tx_id,
                hook = %failure.hook,
                "hook failed during rollback, re-applying entry"
            );
            if let Err(e) = apply(self.store.as_ref(), plan.compensation().relaxed()).await {
                tracing::error!(tx_id = %entry.tx_id, error = %e, "failed to re-apply entry");
                return Err(e);
            }
            if self.config.notify_compensation {
                AsyncHookDispatcher::notify_compensation(&report.accepted, &change).await;
            }
            return Err(failure.into_error(&plan.fact_id));
        }

        self.store.remove_log(&entry.tx_id).await?;
        tracing::debug!(tx_id = %entry.tx_id, kind = %entry.kind, "entry rolled back");
        Ok(true)
    }

    async fn execute(&self, plan: WritePlan, cancel: &mut CancelWatch) -> Result<FactId> {
        let started = Instant::now();
        tracing::debug!(fact_id = %plan.fact_id, kind = %plan.kind, "applying write");
        apply(self.store.as_ref(), plan.forward()).await?;

        let entry = plan.log_entry(TxId::generate(), self.next_sequence());
        if let Err(e) = self.store.append_log(&entry).await {
            tracing::warn!(fact_id = %plan.fact_id, error = %e, "log append failed, compensating");
            if let Err(restore_err) = self.restore(&plan).await {
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
        let report = self.hooks.dispatch(&change, cancel).await;
        if let Some(failure) = report.failure {
            tracing::warn!(
                fact_id = %plan.fact_id,
                hook = %failure.hook,
                "hook did not accept write, compensating"
            );
            // the write stays logged so rollback can still undo it
            if let Err(e) = self.restore(&plan).await {
                tracing::error!(
                    fact_id = %plan.fact_id,
                    tx_id = %entry.tx_id,
                    hook = %failure.hook,
                    error = %e,
                    "compensation write failed, write kept in log"
                );
                return Err(e);
            }
            let unlogged = self.store.remove_log(&entry.tx_id).await;
            if self.config.notify_compensation {
                AsyncHookDispatcher::notify_compensation(&report.accepted, &change).await;
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

    async fn restore(&self, plan: &WritePlan) -> Result<()> {
        apply(self.store.as_ref(), plan.compensation()).await
    }

    fn next_sequence(&self) -> Sequence {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn require(&self, fact_id: &FactId) -> Result<Fact> {
        self.store
            .get(fact_id)
            .await?
            .ok_or_else(|| MemstateError::NotFound(fact_id.to_string()))
    }

    async fn session_facts(
        &self,
        session_id: &str,
        selector: Option<&FactQuery>,
    ) -> Result<Vec<Fact>> {
        let mut facts = self
            .store
            .list_current(&FactQuery::new().in_session(session_id))
            .await?;
        if let Some(selector) = selector {
            facts.retain(|fact| selector.matches(fact));
        }
        Ok(facts)
    }

    async fn owned_by(&self, fact_id: &FactId, session_id: &str) -> Result<Option<Fact>> {
        Ok(self
            .store
            .get(fact_id)
            .await?
            .filter(|fact| fact.session_id.as_deref() == Some(session_id)))
    }
}

async fn apply(store: &dyn AsyncFactStore, write: StoreWrite<'_>) -> Result<()> {
    match write {
        StoreWrite::Insert(fact) => store.insert(fact).await.map(|_| ()),
        StoreWrite::Replace(fact) => store.update(fact).await,
        StoreWrite::Remove(id) => store.delete(id).await,
        StoreWrite::Restore(fact) => match store.get(&fact.id).await? {
            Some(_) => store.update(fact).await,
            None => store.insert(fact).await.map(|_| ()),
        },
    }
}
