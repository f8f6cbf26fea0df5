//! Adapter contract tests for the in-memory fact store

use chrono::Utc;
use memstate_core::{
    AsyncFactStore, Fact, FactId, FactQuery, FactStore, LogEntry, MemstateError, OpKind, TxId,
};
use memstate_memory::{AsyncInMemoryFactStore, InMemoryFactStore};
use serde_json::json;

fn fact(fact_type: &str, payload: serde_json::Value) -> Fact {
    Fact::from_json(fact_type, payload).unwrap()
}

fn entry(seq: u64, fact: &Fact, session: Option<&str>) -> LogEntry {
    LogEntry {
        tx_id: TxId::generate(),
        sequence: seq,
        fact_id: fact.id.clone(),
        kind: OpKind::Insert,
        before: None,
        after: Some(fact.clone()),
        session_id: session.map(str::to_string),
        actor: None,
        reason: None,
        recorded_at: Utc::now(),
    }
}

#[test]
fn test_insert_get_update_delete() {
    let store = InMemoryFactStore::new();
    let mut f = fact("pref", json!({"content": "vegetarian"}));

    let id = store.insert(&f).unwrap();
    assert_eq!(id, f.id);
    assert_eq!(store.get(&id).unwrap().unwrap().payload["content"], "vegetarian");

    f.payload.insert("content".into(), json!("steak"));
    store.update(&f).unwrap();
    assert_eq!(store.get(&id).unwrap().unwrap().payload["content"], "steak");

    store.delete(&id).unwrap();
    assert!(store.get(&id).unwrap().is_none());
    // deleting again is a no-op
    store.delete(&id).unwrap();
}

#[test]
fn test_duplicate_insert_and_missing_update_fail() {
    let store = InMemoryFactStore::new();
    let f = fact("pref", json!({"content": "x"}));
    store.insert(&f).unwrap();

    assert!(matches!(store.insert(&f), Err(MemstateError::Storage(_))));

    let ghost = fact("pref", json!({})).with_id("missing");
    assert!(matches!(store.update(&ghost), Err(MemstateError::NotFound(_))));
}

#[test]
fn test_find_by_field_is_type_scoped() {
    let store = InMemoryFactStore::new();
    let user = fact("user", json!({"username": "neo", "level": 99}));
    let admin = fact("admin", json!({"username": "neo"}));
    store.insert(&user).unwrap();
    store.insert(&admin).unwrap();

    let found = store.find_by_field("user", "username", &json!("neo")).unwrap();
    assert_eq!(found, Some(user.id.clone()));
    assert!(store
        .find_by_field("user", "username", &json!("trinity"))
        .unwrap()
        .is_none());
    assert!(store
        .find_by_field("ghost", "username", &json!("neo"))
        .unwrap()
        .is_none());
}

#[test]
fn test_list_current_filters() {
    let store = InMemoryFactStore::new();
    store
        .insert(&fact("user", json!({"name": "a", "address": {"city": "Oslo"}})))
        .unwrap();
    store
        .insert(&fact("user", json!({"name": "b", "address": {"city": "Rome"}})).with_session("s1"))
        .unwrap();
    store.insert(&fact("note", json!({"name": "a"}))).unwrap();

    assert_eq!(store.list_current(&FactQuery::new()).unwrap().len(), 3);
    assert_eq!(store.list_current(&FactQuery::of_type("user")).unwrap().len(), 2);

    let oslo = store
        .list_current(&FactQuery::of_type("user").filter("address.city", "Oslo"))
        .unwrap();
    assert_eq!(oslo.len(), 1);
    assert_eq!(oslo[0].payload["name"], "a");

    let scoped = store
        .list_current(&FactQuery::new().in_session("s1"))
        .unwrap();
    assert_eq!(scoped.len(), 1);

    assert!(store
        .list_current(&FactQuery::of_type("missing"))
        .unwrap()
        .is_empty());
}

#[test]
fn test_log_ordering_scoping_and_removal() {
    let store = InMemoryFactStore::new();
    let f = fact("pref", json!({}));
    let e1 = entry(1, &f, Some("A"));
    let e2 = entry(2, &f, Some("B"));
    let e3 = entry(3, &f, Some("A"));
    for e in [&e1, &e2, &e3] {
        store.append_log(e).unwrap();
    }

    let all = store.list_log(None, 10).unwrap();
    let seqs: Vec<u64> = all.iter().map(|e| e.sequence).collect();
    assert_eq!(seqs, vec![3, 2, 1]);

    let scoped = store.list_log(Some("A"), 10).unwrap();
    let seqs: Vec<u64> = scoped.iter().map(|e| e.sequence).collect();
    assert_eq!(seqs, vec![3, 1]);

    assert_eq!(store.list_log(None, 1).unwrap()[0].sequence, 3);

    store.remove_log(&e3.tx_id).unwrap();
    assert!(!store.contains_log(&e3.tx_id).unwrap());
    assert!(store.contains_log(&e1.tx_id).unwrap());
    assert_eq!(store.list_log(Some("A"), 10).unwrap().len(), 1);

    // high-water mark survives removal of the newest entry
    assert_eq!(store.max_sequence().unwrap(), 3);
    assert_eq!(store.log_len(), 2);
}

#[test]
fn test_duplicate_log_identity_rejected() {
    let store = InMemoryFactStore::new();
    let f = fact("pref", json!({}));
    let e1 = entry(1, &f, None);
    store.append_log(&e1).unwrap();

    assert!(store.append_log(&e1).is_err());
    let mut same_seq = entry(1, &f, None);
    same_seq.tx_id = TxId::from("other");
    assert!(store.append_log(&same_seq).is_err());
}

#[tokio::test]
async fn test_async_handle_contract() {
    let store = AsyncInMemoryFactStore::new();
    let f = fact("user", json!({"username": "neo"}));
    let id = store.insert(&f).await.unwrap();

    let found = store
        .find_by_field("user", "username", &json!("neo"))
        .await
        .unwrap();
    assert_eq!(found, Some(id.clone()));

    let e = entry(7, &f, None);
    store.append_log(&e).await.unwrap();
    assert_eq!(store.max_sequence().await.unwrap(), 7);
    assert!(store.contains_log(&e.tx_id).await.unwrap());

    store.delete(&FactId::from(id.as_str())).await.unwrap();
    assert!(store.get(&id).await.unwrap().is_none());
}
