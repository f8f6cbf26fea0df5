//! Write saga shared by the threaded and cooperative stores
//!
//! A mutation moves through `validate -> plan -> write -> log -> notify`,
//! with `compensate` on the failure edge. Everything here is pure: the
//! drivers in `store` and `async_store` perform the I/O at each suspend
//! point (store write, log append, hook call) and feed the results back in,
//! so both modes share one ordering and one compensation rule.

use crate::options::CommitOptions;
use chrono::Utc;
use memstate_core::{
    Change, Fact, FactId, ImmutableRollback, LogEntry, MemstateError, OpKind, Payload, Resolved,
    Result, Sequence, TxId,
};

/// A resolved mutation of one fact
///
/// `before`/`after` are full snapshots. The operation kind follows from
/// which of them is present.
#[derive(Debug, Clone)]
pub(crate) struct WritePlan {
    pub kind: OpKind,
    pub fact_id: FactId,
    pub before: Option<Fact>,
    pub after: Option<Fact>,
    /// Session the log entry is scoped to
    pub scope: Option<String>,
    pub actor: Option<String>,
    pub reason: Option<String>,
}

/// A single store mutation derived from a plan
#[derive(Debug, Clone, Copy)]
pub(crate) enum StoreWrite<'a> {
    Insert(&'a Fact),
    Replace(&'a Fact),
    Remove(&'a FactId),
    /// Insert or overwrite, whichever the current store state needs
    Restore(&'a Fact),
}

impl<'a> StoreWrite<'a> {
    /// Tolerant form used when undoing log entries
    ///
    /// A session-scoped rollback may find a fact already removed (or
    /// recreated) by writes outside its scope.
    pub fn relaxed(self) -> Self {
        match self {
            StoreWrite::Insert(fact) | StoreWrite::Replace(fact) => StoreWrite::Restore(fact),
            other => other,
        }
    }
}

impl WritePlan {
    /// The write that performs this plan
    pub fn forward(&self) -> StoreWrite<'_> {
        match (&self.before, &self.after) {
            (_, None) => StoreWrite::Remove(&self.fact_id),
            (None, Some(after)) => StoreWrite::Insert(after),
            (Some(_), Some(after)) => StoreWrite::Replace(after),
        }
    }

    /// The write that puts the store back to `before`
    pub fn compensation(&self) -> StoreWrite<'_> {
        match (&self.before, &self.after) {
            (None, _) => StoreWrite::Remove(&self.fact_id),
            (Some(before), None) => StoreWrite::Insert(before),
            (Some(before), Some(_)) => StoreWrite::Replace(before),
        }
    }

    pub fn change(&self) -> Change<'_> {
        Change {
            kind: self.kind,
            fact_id: &self.fact_id,
            before: self.before.as_ref(),
            after: self.after.as_ref(),
        }
    }

    pub fn log_entry(&self, tx_id: TxId, sequence: Sequence) -> LogEntry {
        LogEntry {
            tx_id,
            sequence,
            fact_id: self.fact_id.clone(),
            kind: self.kind,
            before: self.before.clone(),
            after: self.after.clone(),
            session_id: self.scope.clone(),
            actor: self.actor.clone(),
            reason: self.reason.clone(),
            recorded_at: Utc::now(),
        }
    }
}

/// Result of one hook call
#[derive(Debug)]
pub(crate) enum HookOutcome {
    Accepted,
    Rejected(HookFault),
}

/// Why a hook call did not accept a change
#[derive(Debug)]
pub(crate) enum HookFault {
    Failed(anyhow::Error),
    /// The caller went away while the hook was running
    Cancelled,
}

impl HookOutcome {
    pub fn from_result(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => HookOutcome::Accepted,
            Err(e) => HookOutcome::Rejected(HookFault::Failed(e)),
        }
    }
}

/// The hook that stopped a dispatch, and why
#[derive(Debug)]
pub(crate) struct HookFailure {
    pub hook: String,
    pub fault: HookFault,
}

impl HookFailure {
    /// Error surfaced to the caller once compensation is done
    pub fn into_error(self, fact_id: &FactId) -> MemstateError {
        match self.fault {
            HookFault::Cancelled => MemstateError::Cancelled {
                fact_id: fact_id.to_string(),
            },
            HookFault::Failed(source) => MemstateError::Hook {
                hook: self.hook,
                fact_id: fact_id.to_string(),
                source,
            },
        }
    }
}

/// Outcome of notifying every hook about one change
///
/// `accepted` holds the hooks that returned before the failure, in call
/// order; they receive the inverse change if the write is compensated.
pub(crate) struct DispatchReport<H> {
    pub accepted: Vec<H>,
    pub failure: Option<HookFailure>,
}

impl<H> DispatchReport<H> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<H> Default for DispatchReport<H> {
    fn default() -> Self {
        Self {
            accepted: Vec::new(),
            failure: None,
        }
    }
}

/// Lock keys for a mutation of `fact_id`
pub(crate) fn lock_keys(fact_id: &FactId, fact_type: &str, resolved: &Resolved) -> Vec<Vec<u8>> {
    let mut keys = vec![fact_id.lock_key()];
    keys.extend(resolved.type_lock_key(fact_type));
    keys
}

/// Value of the singleton field in `payload`, if the type has one
pub(crate) fn singleton_value<'a>(
    resolved: &'a Resolved,
    payload: &'a Payload,
) -> Option<(&'a str, &'a serde_json::Value)> {
    let key = resolved.singleton_key()?;
    memstate_core::payload::lookup_path(payload, key)
        .filter(|v| !v.is_null())
        .map(|v| (key, v))
}

/// Decide which existing fact (if any) a commit targets
///
/// Returns `None` for a fresh INSERT under the fact's own id.
pub(crate) fn resolve_commit_target(
    own_id: &FactId,
    own_exists: bool,
    singleton_match: Option<FactId>,
    fact_type: &str,
) -> Result<Option<FactId>> {
    match (own_exists, singleton_match) {
        (true, Some(matched)) if &matched != own_id => Err(MemstateError::Conflict(format!(
            "fact {} of type '{}' would duplicate singleton fact {}",
            own_id, fact_type, matched
        ))),
        (true, _) => Ok(Some(own_id.clone())),
        (false, matched) => Ok(matched),
    }
}

/// Plan a commit of a complete document
///
/// `payload` is the validated payload. With an existing target the stored
/// payload is replaced; identity, `created_at` and (absent a new session)
/// ownership are kept.
pub(crate) fn plan_commit(
    fact: Fact,
    payload: Payload,
    resolved: &Resolved,
    target: Option<Fact>,
    options: &CommitOptions,
) -> Result<WritePlan> {
    let now = Utc::now();
    let session = options.session_id.clone().or_else(|| fact.session_id.clone());
    let actor = options.actor.clone().or_else(|| fact.actor.clone());

    match target {
        Some(before) => {
            if before.fact_type != fact.fact_type {
                return Err(MemstateError::Conflict(format!(
                    "fact {} has type '{}', cannot commit as '{}'",
                    before.id, before.fact_type, fact.fact_type
                )));
            }
            if resolved.is_immutable() {
                return Err(immutable_violation(&before));
            }
            let after = Fact {
                id: before.id.clone(),
                fact_type: fact.fact_type,
                payload,
                source: fact.source.or_else(|| before.source.clone()),
                session_id: session.clone().or_else(|| before.session_id.clone()),
                actor: actor.clone(),
                created_at: before.created_at,
                updated_at: now,
            };
            Ok(WritePlan {
                kind: OpKind::Update,
                fact_id: after.id.clone(),
                scope: session.or_else(|| after.session_id.clone()),
                before: Some(before),
                after: Some(after),
                actor,
                reason: options.reason.clone(),
            })
        }
        None => {
            let after = Fact {
                payload,
                session_id: session.clone(),
                actor: actor.clone(),
                updated_at: now,
                ..fact
            };
            Ok(WritePlan {
                kind: OpKind::Insert,
                fact_id: after.id.clone(),
                before: None,
                after: Some(after),
                scope: session,
                actor,
                reason: options.reason.clone(),
            })
        }
    }
}

/// Plan a patch of an existing fact
///
/// `merged` is the validated result of the stored payload plus the patch.
/// `clash` is the singleton lookup for the merged payload.
pub(crate) fn plan_update(
    before: Fact,
    merged: Payload,
    resolved: &Resolved,
    clash: Option<FactId>,
    options: &CommitOptions,
) -> Result<WritePlan> {
    if resolved.is_immutable() {
        return Err(immutable_violation(&before));
    }
    if let Some(other) = clash.filter(|other| other != &before.id) {
        return Err(MemstateError::Conflict(format!(
            "update of fact {} would duplicate singleton fact {}",
            before.id, other
        )));
    }
    let actor = options.actor.clone().or_else(|| before.actor.clone());
    let after = Fact {
        payload: merged,
        actor: actor.clone(),
        updated_at: Utc::now(),
        ..before.clone()
    };
    Ok(WritePlan {
        kind: OpKind::Update,
        fact_id: before.id.clone(),
        scope: options
            .session_id
            .clone()
            .or_else(|| before.session_id.clone()),
        before: Some(before),
        after: Some(after),
        actor,
        reason: options.reason.clone(),
    })
}

/// Plan an explicit delete
pub(crate) fn plan_delete(
    before: Fact,
    resolved: &Resolved,
    options: &CommitOptions,
) -> Result<WritePlan> {
    if resolved.is_immutable() {
        return Err(immutable_violation(&before));
    }
    Ok(plan_removal(before, options))
}

/// Plan the removal of a session-owned fact
///
/// Session teardown removes working memory regardless of immutability.
pub(crate) fn plan_removal(before: Fact, options: &CommitOptions) -> WritePlan {
    WritePlan {
        kind: OpKind::Delete,
        fact_id: before.id.clone(),
        scope: options
            .session_id
            .clone()
            .or_else(|| before.session_id.clone()),
        before: Some(before),
        after: None,
        actor: options.actor.clone(),
        reason: options.reason.clone(),
    }
}

/// Plan moving a session fact into global scope
///
/// Only ownership changes, so immutability does not apply. The log entry is
/// scoped to the session being promoted, keeping the promotion rollback-able
/// from that session.
pub(crate) fn plan_promote(before: Fact, session_id: &str, options: &CommitOptions) -> WritePlan {
    let actor = options.actor.clone().or_else(|| before.actor.clone());
    let after = Fact {
        session_id: None,
        actor: actor.clone(),
        updated_at: Utc::now(),
        ..before.clone()
    };
    WritePlan {
        kind: OpKind::Update,
        fact_id: before.id.clone(),
        before: Some(before),
        after: Some(after),
        scope: Some(session_id.to_string()),
        actor,
        reason: options.reason.clone(),
    }
}

/// Plan undoing a log entry
///
/// The snapshots swap and the kind inverts, so hooks see a DELETE for an
/// undone INSERT and an INSERT for an undone DELETE.
pub(crate) fn plan_undo(entry: &LogEntry) -> WritePlan {
    WritePlan {
        kind: entry.kind.inverse(),
        fact_id: entry.fact_id.clone(),
        before: entry.after.clone(),
        after: entry.before.clone(),
        scope: entry.session_id.clone(),
        actor: entry.actor.clone(),
        reason: Some(format!("rollback of {}", entry.tx_id)),
    }
}

/// Refuse undoing entries on immutable types when the policy says so
pub(crate) fn check_undo_policy(
    entry: &LogEntry,
    resolved: &Resolved,
    policy: ImmutableRollback,
) -> Result<()> {
    if policy == ImmutableRollback::Deny && resolved.is_immutable() {
        return Err(MemstateError::Conflict(format!(
            "rollback of {} on immutable type '{}' is denied",
            entry.tx_id,
            entry.fact_type().unwrap_or_default()
        )));
    }
    Ok(())
}

/// Wrap a failure part-way through a rollback
pub(crate) fn partial(reverted: usize, source: MemstateError) -> MemstateError {
    MemstateError::PartialRollback {
        reverted,
        source: Box::new(source),
    }
}

fn immutable_violation(fact: &Fact) -> MemstateError {
    MemstateError::Conflict(format!(
        "immutable constraint violation: {}:{}",
        fact.fact_type, fact.id
    ))
}
