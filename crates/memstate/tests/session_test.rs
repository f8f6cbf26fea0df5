//! Session promotion/teardown, search and history

use memstate::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;

fn fact(fact_type: &str, payload: serde_json::Value) -> Fact {
    Fact::from_json(fact_type, payload).unwrap()
}

fn in_session(session: &str) -> CommitOptions {
    CommitOptions::new().with_session(session)
}

#[test]
fn test_promote_session_with_selector() {
    let memory = MemoryStore::in_memory().unwrap();
    let n1 = memory
        .commit(fact("note", json!({"text": "one"})), in_session("s1"))
        .unwrap();
    let n2 = memory
        .commit(fact("note", json!({"text": "two"})), in_session("s1"))
        .unwrap();
    let pref = memory
        .commit(fact("pref", json!({"content": "tea"})), in_session("s1"))
        .unwrap();
    let other = memory
        .commit(fact("note", json!({"text": "other"})), in_session("s2"))
        .unwrap();

    let mut promoted = memory
        .promote_session("s1", Some(&FactQuery::of_type("note")), CommitOptions::new())
        .unwrap();
    promoted.sort();
    let mut expected = vec![n1.clone(), n2.clone()];
    expected.sort();
    assert_eq!(promoted, expected);

    assert_eq!(memory.get(&n1).unwrap().unwrap().session_id, None);
    assert_eq!(memory.get(&n2).unwrap().unwrap().session_id, None);
    assert_eq!(
        memory.get(&pref).unwrap().unwrap().session_id.as_deref(),
        Some("s1")
    );
    assert_eq!(
        memory.get(&other).unwrap().unwrap().session_id.as_deref(),
        Some("s2")
    );

    // promotions are logged under the promoted session and can be undone
    let log = memory.history(Some("s1"), 10).unwrap();
    assert_eq!(log.len(), 5);
    assert!(log[..2].iter().all(|entry| entry.kind == OpKind::Update));

    assert_eq!(memory.rollback(2, Some("s1")).unwrap(), 2);
    assert_eq!(
        memory.get(&n1).unwrap().unwrap().session_id.as_deref(),
        Some("s1")
    );
    assert_eq!(
        memory.get(&n2).unwrap().unwrap().session_id.as_deref(),
        Some("s1")
    );
}

#[test]
fn test_promote_keeps_payload_and_allows_immutable_types() {
    let memory = MemoryStore::in_memory().unwrap();
    memory
        .registry()
        .register_constraint("audit", Constraint::immutable());
    let id = memory
        .commit(fact("audit", json!({"event": "login"})), in_session("s1"))
        .unwrap();
    let before = memory.get(&id).unwrap().unwrap();

    assert_eq!(
        memory
            .promote_session("s1", None, CommitOptions::new())
            .unwrap(),
        vec![id.clone()]
    );
    let after = memory.get(&id).unwrap().unwrap();
    assert_eq!(after.payload, before.payload);
    assert_eq!(after.created_at, before.created_at);
    assert_eq!(after.session_id, None);

    assert!(memory
        .promote_session("s1", None, CommitOptions::new())
        .unwrap()
        .is_empty());
}

#[test]
fn test_discard_session_deletes_and_rolls_back() {
    let memory = MemoryStore::in_memory().unwrap();
    let mut ids = Vec::new();
    for text in ["a", "b", "c"] {
        ids.push(
            memory
                .commit(fact("note", json!({"text": text})), in_session("scratch"))
                .unwrap(),
        );
    }
    let kept = memory
        .commit(fact("note", json!({"text": "global"})), CommitOptions::new())
        .unwrap();

    assert_eq!(
        memory
            .discard_session("scratch", CommitOptions::new().with_reason("abandoned"))
            .unwrap(),
        3
    );
    assert!(memory
        .query(&FactQuery::new().in_session("scratch"))
        .unwrap()
        .is_empty());
    assert!(memory.get(&kept).unwrap().is_some());

    let log = memory.history(Some("scratch"), 3).unwrap();
    assert!(log.iter().all(|entry| entry.kind == OpKind::Delete));
    assert!(log
        .iter()
        .all(|entry| entry.reason.as_deref() == Some("abandoned")));

    assert_eq!(memory.rollback(3, Some("scratch")).unwrap(), 3);
    for id in &ids {
        assert!(memory.get(id).unwrap().is_some());
    }
}

#[test]
fn test_discard_unknown_session_is_noop() {
    let memory = MemoryStore::in_memory().unwrap();
    memory
        .commit(fact("note", json!({"text": "global"})), CommitOptions::new())
        .unwrap();
    assert_eq!(
        memory
            .discard_session("nobody", CommitOptions::new())
            .unwrap(),
        0
    );
    assert_eq!(memory.history(None, 10).unwrap().len(), 1);
}

#[test]
fn test_history_scope_and_limit() {
    let memory = MemoryStore::in_memory().unwrap();
    for n in 0..4 {
        memory
            .commit(fact("note", json!({"n": n})), in_session("s1"))
            .unwrap();
    }
    memory
        .commit(fact("note", json!({"n": 99})), CommitOptions::new())
        .unwrap();

    let all = memory.history(None, 100).unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.windows(2).all(|w| w[0].sequence > w[1].sequence));
    assert_eq!(all[0].session_id, None);

    let scoped = memory.history(Some("s1"), 2).unwrap();
    assert_eq!(scoped.len(), 2);
    assert!(scoped
        .iter()
        .all(|entry| entry.session_id.as_deref() == Some("s1")));
}

/// Keyword index kept in sync through hook notifications
#[derive(Default)]
struct KeywordIndex {
    docs: Mutex<HashMap<FactId, String>>,
}

impl Hook for KeywordIndex {
    fn name(&self) -> &str {
        "keywords"
    }

    fn on_write(&self, change: &Change<'_>) -> anyhow::Result<()> {
        let mut docs = self.docs.lock();
        match change.current() {
            Some(fact) => {
                let text = fact
                    .payload
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_lowercase();
                docs.insert(fact.id.clone(), text);
            }
            None => {
                docs.remove(change.fact_id);
            }
        }
        Ok(())
    }

    fn search(&self, request: &SearchRequest) -> anyhow::Result<Option<Vec<SearchHit>>> {
        let query = request.query.to_lowercase();
        let hits = self
            .docs
            .lock()
            .iter()
            .filter_map(|(id, text)| {
                let score = if *text == query {
                    1.0
                } else if text.contains(&query) {
                    0.6
                } else {
                    return None;
                };
                Some(SearchHit {
                    fact_id: id.clone(),
                    score,
                })
            })
            .collect();
        Ok(Some(hits))
    }
}

/// Index that still remembers a fact the store no longer has
struct StaleIndex;

impl Hook for StaleIndex {
    fn on_write(&self, _change: &Change<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn search(&self, _request: &SearchRequest) -> anyhow::Result<Option<Vec<SearchHit>>> {
        Ok(Some(vec![SearchHit {
            fact_id: FactId::from("long-gone"),
            score: 0.99,
        }]))
    }
}

fn searchable() -> MemoryStore {
    let memory = MemoryStore::builder(Arc::new(InMemoryFactStore::new()))
        .with_hook(Arc::new(KeywordIndex::default()))
        .with_hook(Arc::new(StaleIndex))
        .build()
        .unwrap();
    for (content, lang) in [
        ("green tea", "en"),
        ("tea", "en"),
        ("black tea", "fr"),
        ("coffee", "en"),
    ] {
        memory
            .commit(
                fact("pref", json!({"content": content, "lang": lang})),
                CommitOptions::new(),
            )
            .unwrap();
    }
    memory
}

#[test]
fn test_search_orders_by_score_and_drops_ghosts() {
    let memory = searchable();
    let results = memory.search(&SearchRequest::new("tea").limit(10)).unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].fact.payload["content"], "tea");
    assert_eq!(results[0].score, 1.0);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(results
        .iter()
        .all(|r| r.fact.id != FactId::from("long-gone")));
}

#[test]
fn test_search_limit_threshold_and_filters() {
    let memory = searchable();

    let top = memory.search(&SearchRequest::new("tea").limit(1)).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].fact.payload["content"], "tea");

    let strict = memory
        .search(&SearchRequest::new("tea").limit(10).score_threshold(0.9))
        .unwrap();
    assert_eq!(strict.len(), 1);

    let french = memory
        .search(&SearchRequest::new("tea").limit(10).filter("lang", "fr"))
        .unwrap();
    assert_eq!(french.len(), 1);
    assert_eq!(french[0].fact.payload["content"], "black tea");
}

#[test]
fn test_search_sees_rollback() {
    let memory = searchable();
    memory.rollback(3, None).unwrap();

    let results = memory.search(&SearchRequest::new("tea").limit(10)).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].fact.payload["content"], "green tea");
}

#[test]
fn test_search_without_index_is_empty() {
    let memory = MemoryStore::in_memory().unwrap();
    memory
        .commit(fact("pref", json!({"content": "tea"})), CommitOptions::new())
        .unwrap();
    assert!(memory
        .search(&SearchRequest::new("tea"))
        .unwrap()
        .is_empty());
}
