//! Compensating hook example
//!
//! Demonstrates:
//! - Keeping a secondary index in sync through an async hook
//! - A failing index write undoing the primary write
//! - Searching through the index, with results resolved against the store
//!
//! Run with: cargo run --example compensating_hook

use async_trait::async_trait;
use memstate::prelude::*;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;

/// Toy embedding index: stores lowercase text, scores by shared words
#[derive(Default)]
struct TextIndex {
    docs: RwLock<HashMap<FactId, String>>,
}

#[async_trait]
impl AsyncHook for TextIndex {
    fn name(&self) -> &str {
        "text-index"
    }

    async fn on_write(&self, change: &Change<'_>) -> anyhow::Result<()> {
        match change.current() {
            Some(fact) => {
                let text = fact
                    .payload
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_lowercase();
                anyhow::ensure!(text.len() <= 64, "document too large to embed");
                self.docs.write().insert(fact.id.clone(), text);
            }
            None => {
                self.docs.write().remove(change.fact_id);
            }
        }
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> anyhow::Result<Option<Vec<SearchHit>>> {
        let query = request.query.to_lowercase();
        let words: Vec<&str> = query.split_whitespace().collect();
        let hits = self
            .docs
            .read()
            .iter()
            .filter_map(|(id, text)| {
                let shared = words.iter().filter(|w| text.contains(**w)).count();
                (shared > 0).then(|| SearchHit {
                    fact_id: id.clone(),
                    score: shared as f32 / words.len() as f32,
                })
            })
            .collect();
        Ok(Some(hits))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("memstate=debug")
        .init();

    let memory = AsyncMemoryStore::builder(Arc::new(AsyncInMemoryFactStore::new()))
        .with_hook(Arc::new(TextIndex::default()))
        .build()
        .await?;

    for content in ["green tea in the morning", "black coffee after lunch"] {
        let id = memory
            .commit(
                Fact::from_json("pref", json!({ "content": content }))?,
                CommitOptions::new(),
            )
            .await?;
        println!("committed {id}: {content}");
    }

    // the index refuses this document, so the store write is undone
    let oversized = "tea ".repeat(40);
    match memory
        .commit(
            Fact::from_json("pref", json!({ "content": oversized }))?,
            CommitOptions::new(),
        )
        .await
    {
        Ok(id) => println!("unexpectedly committed {id}"),
        Err(e) => println!("rejected (compensated = {}): {e}", e.is_compensated()),
    }
    println!(
        "facts: {}, log entries: {}",
        memory.query(&FactQuery::new()).await?.len(),
        memory.history(None, 100).await?.len()
    );

    for hit in memory.search(&SearchRequest::new("tea morning")).await? {
        println!("{:.2} {}", hit.score, hit.fact.payload["content"]);
    }

    memory.close().await
}
