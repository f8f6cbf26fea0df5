//! Hook dispatchers
//!
//! Hooks are kept in registration order and always called sequentially in
//! that order, for forward writes and rollback notifications alike. Each
//! dispatch works on a snapshot of the list, so registering a hook while a
//! write is in flight never changes who that write notifies.

use crate::saga::{DispatchReport, HookFailure, HookFault, HookOutcome};
use memstate_core::{observe, AsyncHook, Change, Hook, MemstateError, Result, SearchHit, SearchRequest};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Ordered hooks for a threaded store
#[derive(Default)]
pub struct HookDispatcher {
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; it is called after every hook registered before it
    pub fn register(&self, hook: Arc<dyn Hook>) {
        tracing::debug!(hook = hook.name(), "registering hook");
        self.hooks.write().push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Hook>> {
        self.hooks.read().clone()
    }

    /// Notify hooks in order, stopping at the first failure
    pub(crate) fn dispatch(&self, change: &Change<'_>) -> DispatchReport<Arc<dyn Hook>> {
        let mut report = DispatchReport::new();
        for hook in self.snapshot() {
            match HookOutcome::from_result(hook.on_write(change)) {
                HookOutcome::Accepted => report.accepted.push(hook),
                HookOutcome::Rejected(fault) => {
                    observe::record_hook_failure();
                    report.failure = Some(HookFailure {
                        hook: hook.name().to_string(),
                        fault,
                    });
                    break;
                }
            }
        }
        report
    }

    /// Tell hooks that accepted `change` that it was compensated
    ///
    /// Best effort, newest hook first. Failures are only logged.
    pub(crate) fn notify_compensation(accepted: &[Arc<dyn Hook>], change: &Change<'_>) {
        let inverse = change.inverse();
        for hook in accepted.iter().rev() {
            if let Err(e) = hook.on_write(&inverse) {
                tracing::warn!(
                    hook = hook.name(),
                    fact_id = %change.fact_id,
                    error = %e,
                    "compensation notification failed"
                );
            }
        }
    }

    /// Collect search hits from every search-capable hook
    pub(crate) fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for hook in self.snapshot() {
            match hook.search(request) {
                Ok(Some(found)) => hits.extend(found),
                Ok(None) => {}
                Err(e) => return Err(search_failed(hook.name(), e)),
            }
        }
        Ok(rank_hits(hits, request))
    }
}

/// Ordered hooks for a cooperatively scheduled store
#[derive(Default)]
pub struct AsyncHookDispatcher {
    hooks: RwLock<Vec<Arc<dyn AsyncHook>>>,
}

impl AsyncHookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn AsyncHook>) {
        tracing::debug!(hook = hook.name(), "registering hook");
        self.hooks.write().push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn AsyncHook>> {
        self.hooks.read().clone()
    }

    /// Notify hooks in order, stopping at the first failure
    ///
    /// Cancellation of the caller is observed between hook calls and after
    /// the last one. A hook call always runs to completion, so a hook that
    /// was running when the caller left counts as accepted and is told
    /// about the compensation.
    pub(crate) async fn dispatch(
        &self,
        change: &Change<'_>,
        cancel: &mut CancelWatch,
    ) -> DispatchReport<Arc<dyn AsyncHook>> {
        let mut report = DispatchReport::new();
        for hook in self.snapshot() {
            if cancel.is_cancelled() {
                report.failure = Some(HookFailure {
                    hook: hook.name().to_string(),
                    fault: HookFault::Cancelled,
                });
                return report;
            }
            match HookOutcome::from_result(hook.on_write(change).await) {
                HookOutcome::Accepted => report.accepted.push(hook),
                HookOutcome::Rejected(fault) => {
                    observe::record_hook_failure();
                    report.failure = Some(HookFailure {
                        hook: hook.name().to_string(),
                        fault,
                    });
                    return report;
                }
            }
        }
        if cancel.is_cancelled() {
            if let Some(last) = report.accepted.last() {
                report.failure = Some(HookFailure {
                    hook: last.name().to_string(),
                    fault: HookFault::Cancelled,
                });
            }
        }
        report
    }

    pub(crate) async fn notify_compensation(accepted: &[Arc<dyn AsyncHook>], change: &Change<'_>) {
        let inverse = change.inverse();
        for hook in accepted.iter().rev() {
            if let Err(e) = hook.on_write(&inverse).await {
                tracing::warn!(
                    hook = hook.name(),
                    fact_id = %change.fact_id,
                    error = %e,
                    "compensation notification failed"
                );
            }
        }
    }

    pub(crate) async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for hook in self.snapshot() {
            match hook.search(request).await {
                Ok(Some(found)) => hits.extend(found),
                Ok(None) => {}
                Err(e) => return Err(search_failed(hook.name(), e)),
            }
        }
        Ok(rank_hits(hits, request))
    }
}

/// Observes whether the caller of a spawned write is still waiting
///
/// The caller keeps the sending half; dropping it (because the caller's
/// future was dropped) closes the channel.
pub(crate) struct CancelWatch {
    rx: Option<oneshot::Receiver<()>>,
    fired: bool,
}

impl CancelWatch {
    /// Watch paired with the returned guard
    pub fn pair() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                rx: Some(rx),
                fired: false,
            },
        )
    }

    /// A watch that never fires
    pub fn never() -> Self {
        Self {
            rx: None,
            fired: false,
        }
    }

    pub fn is_cancelled(&mut self) -> bool {
        if self.fired {
            return true;
        }
        if let Some(rx) = self.rx.as_mut() {
            if let Err(oneshot::error::TryRecvError::Closed) = rx.try_recv() {
                self.fired = true;
            }
        }
        self.fired
    }
}

/// Merge hits from several indices: best score per fact, threshold applied,
/// highest score first. Non-finite scores are dropped.
fn rank_hits(hits: Vec<SearchHit>, request: &SearchRequest) -> Vec<SearchHit> {
    let mut best: HashMap<_, f32> = HashMap::new();
    for hit in hits {
        if !hit.score.is_finite() {
            tracing::debug!(fact_id = %hit.fact_id, "dropping search hit with non-finite score");
            continue;
        }
        if request.score_threshold.is_some_and(|t| hit.score < t) {
            continue;
        }
        let score = best.entry(hit.fact_id).or_insert(hit.score);
        *score = score.max(hit.score);
    }
    let mut ranked: Vec<SearchHit> = best
        .into_iter()
        .map(|(fact_id, score)| SearchHit { fact_id, score })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.fact_id.cmp(&b.fact_id))
    });
    ranked
}

fn search_failed(hook: &str, error: anyhow::Error) -> MemstateError {
    MemstateError::Other(error.context(format!("search hook '{}' failed", hook)))
}
