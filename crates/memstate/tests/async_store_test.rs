//! Cooperative store: same protocol as the threaded store, plus cancellation

use async_trait::async_trait;
use memstate::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn fact(fact_type: &str, payload: serde_json::Value) -> Fact {
    Fact::from_json(fact_type, payload).unwrap()
}

fn patch(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

/// Records kinds; sleeps before accepting and can be told to fail
#[derive(Default)]
struct Index {
    delay: Option<Duration>,
    failing: AtomicBool,
    seen: Mutex<Vec<OpKind>>,
}

impl Index {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

#[async_trait]
impl AsyncHook for Index {
    fn name(&self) -> &str {
        "index"
    }

    async fn on_write(&self, change: &Change<'_>) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("index offline");
        }
        self.seen.lock().push(change.kind);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct User {
    username: String,
    level: u32,
}

#[tokio::test]
async fn test_preference_rollback_scenario() {
    let memory = AsyncMemoryStore::in_memory().await.unwrap();
    let options = CommitOptions::new().with_session("chat-1");

    let id = memory
        .commit(fact("pref", json!({"content": "vegetarian"})), options.clone())
        .await
        .unwrap();
    memory
        .commit(
            fact("pref", json!({"content": "steak"})).with_id(id.clone()),
            options,
        )
        .await
        .unwrap();

    assert_eq!(memory.rollback(1, Some("chat-1")).await.unwrap(), 1);
    let restored = memory.get(&id).await.unwrap().unwrap();
    assert_eq!(restored.payload["content"], "vegetarian");
    assert_eq!(memory.history(None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_singleton_model_commits() {
    let memory = AsyncMemoryStore::in_memory().await.unwrap();
    memory
        .registry()
        .register_model::<User>("user", Some(Constraint::singleton("username")));

    let first = memory
        .commit_model(
            &User {
                username: "neo".into(),
                level: 99,
            },
            None,
            CommitOptions::new(),
        )
        .await
        .unwrap();
    let second = memory
        .commit_model(
            &User {
                username: "neo".into(),
                level: 0,
            },
            None,
            CommitOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(first, second);
    let users = memory.query(&FactQuery::of_type("user")).await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].payload["level"], 0);

    assert!(matches!(
        memory
            .commit_model(
                &User {
                    username: "trinity".into(),
                    level: 1,
                },
                Some(FactId::from("missing")),
                CommitOptions::new(),
            )
            .await,
        Err(MemstateError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_hook_failure_is_compensated() {
    let index = Arc::new(Index::default());
    let memory = AsyncMemoryStore::builder(Arc::new(AsyncInMemoryFactStore::new()))
        .with_hook(index.clone())
        .build()
        .await
        .unwrap();

    let id = memory
        .commit(fact("pref", json!({"content": "tea"})), CommitOptions::new())
        .await
        .unwrap();

    index.failing.store(true, Ordering::SeqCst);
    let err = memory
        .update(&id, patch(json!({"content": "coffee"})), CommitOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MemstateError::Hook { .. }));

    let attempted = fact("pref", json!({"content": "milk"}));
    let attempted_id = attempted.id.clone();
    assert!(memory
        .commit(attempted, CommitOptions::new())
        .await
        .is_err());

    assert_eq!(
        memory.get(&id).await.unwrap().unwrap().payload["content"],
        "tea"
    );
    assert!(memory.get(&attempted_id).await.unwrap().is_none());
    assert_eq!(memory.history(None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_session_scoped_rollback_and_teardown() {
    let memory = AsyncMemoryStore::in_memory().await.unwrap();
    let a = memory
        .commit(
            fact("note", json!({"text": "a"})),
            CommitOptions::new().with_session("A"),
        )
        .await
        .unwrap();
    let b = memory
        .commit(
            fact("note", json!({"text": "b"})),
            CommitOptions::new().with_session("B"),
        )
        .await
        .unwrap();
    memory
        .commit(
            fact("note", json!({"text": "b2"})),
            CommitOptions::new().with_session("B"),
        )
        .await
        .unwrap();

    assert_eq!(memory.rollback(5, Some("A")).await.unwrap(), 1);
    assert!(memory.get(&a).await.unwrap().is_none());
    assert!(memory.get(&b).await.unwrap().is_some());

    let promoted = memory
        .promote_session("B", Some(&FactQuery::new().filter("text", "b")), CommitOptions::new())
        .await
        .unwrap();
    assert_eq!(promoted, vec![b.clone()]);
    assert_eq!(memory.get(&b).await.unwrap().unwrap().session_id, None);

    assert_eq!(
        memory
            .discard_session("B", CommitOptions::new())
            .await
            .unwrap(),
        1
    );
    assert!(memory
        .query(&FactQuery::new().in_session("B"))
        .await
        .unwrap()
        .is_empty());
    assert!(memory.get(&b).await.unwrap().is_some());
}

#[tokio::test]
async fn test_dropped_caller_compensates_write() {
    let index = Arc::new(Index::slow(Duration::from_millis(200)));
    let memory = AsyncMemoryStore::builder(Arc::new(AsyncInMemoryFactStore::new()))
        .with_hook(index.clone())
        .build()
        .await
        .unwrap();

    let attempted = fact("pref", json!({"content": "tea"}));
    let id = attempted.id.clone();
    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        memory.commit(attempted, CommitOptions::new()),
    )
    .await;
    assert!(outcome.is_err(), "caller should have timed out");

    // the running hook finishes, then the write task compensates and tells it
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(memory.get(&id).await.unwrap().is_none());
    assert!(memory.history(None, 10).await.unwrap().is_empty());
    assert_eq!(*index.seen.lock(), vec![OpKind::Insert, OpKind::Delete]);
}

/// Indexes a fact before it finishes its own bookkeeping
#[derive(Default)]
struct EagerIndex {
    docs: Mutex<Vec<FactId>>,
}

#[async_trait]
impl AsyncHook for EagerIndex {
    fn name(&self) -> &str {
        "eager-index"
    }

    async fn on_write(&self, change: &Change<'_>) -> anyhow::Result<()> {
        match change.current() {
            Some(fact) => self.docs.lock().push(fact.id.clone()),
            None => self.docs.lock().retain(|id| id != change.fact_id),
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_dropped_caller_leaves_no_index_entry() {
    let index = Arc::new(EagerIndex::default());
    let memory = AsyncMemoryStore::builder(Arc::new(AsyncInMemoryFactStore::new()))
        .with_hook(index.clone())
        .build()
        .await
        .unwrap();

    let attempted = fact("pref", json!({"content": "tea"}));
    let id = attempted.id.clone();
    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        memory.commit(attempted, CommitOptions::new()),
    )
    .await;
    assert!(outcome.is_err(), "caller should have timed out");

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(memory.get(&id).await.unwrap().is_none());
    assert!(memory.history(None, 10).await.unwrap().is_empty());
    assert!(index.docs.lock().is_empty());
}

#[tokio::test]
async fn test_dropped_caller_does_not_stop_rollback() {
    let index = Arc::new(Index::slow(Duration::from_millis(50)));
    let memory = AsyncMemoryStore::builder(Arc::new(AsyncInMemoryFactStore::new()))
        .with_hook(index.clone())
        .build()
        .await
        .unwrap();
    for n in 0..3 {
        memory
            .commit(fact("note", json!({"n": n})), CommitOptions::new())
            .await
            .unwrap();
    }

    let outcome =
        tokio::time::timeout(Duration::from_millis(10), memory.rollback(3, None)).await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(memory.query(&FactQuery::new()).await.unwrap().is_empty());
    assert!(memory.history(None, 10).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_share_one_store() {
    let memory = AsyncMemoryStore::in_memory().await.unwrap();
    memory
        .registry()
        .register_constraint("user", Constraint::singleton("username"));

    let mut handles = Vec::new();
    for t in 0..16u32 {
        let memory = memory.clone();
        handles.push(tokio::spawn(async move {
            memory
                .commit(
                    fact("user", json!({"username": "neo", "level": t})),
                    CommitOptions::new(),
                )
                .await
                .unwrap();
            memory
                .commit(fact("note", json!({"n": t})), CommitOptions::new())
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        memory
            .query(&FactQuery::of_type("user"))
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        memory
            .query(&FactQuery::of_type("note"))
            .await
            .unwrap()
            .len(),
        16
    );
    assert_eq!(memory.history(None, 100).await.unwrap().len(), 32);
}
