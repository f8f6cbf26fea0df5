//! Basic memstate usage
//!
//! This example demonstrates:
//! - Registering a model with a singleton constraint
//! - Committing facts inside a session
//! - Rolling back only that session's writes
//! - Promoting and discarding sessions
//!
//! Run with: cargo run --example basic_usage

use memstate::prelude::*;
use serde_json::json;

#[derive(Debug, Serialize, Deserialize)]
struct User {
    username: String,
    level: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("memstate=info")
        .init();

    let memory = MemoryStore::in_memory()?;
    memory
        .registry()
        .register_model::<User>("user", Some(Constraint::singleton("username")));

    // 1. Singleton upsert: the second commit updates the first fact
    println!("Step 1: singleton commits");
    let neo = memory.commit_model(
        &User {
            username: "neo".into(),
            level: 99,
        },
        None,
        CommitOptions::new().with_actor("onboarding"),
    )?;
    let again = memory.commit_model(
        &User {
            username: "neo".into(),
            level: 100,
        },
        None,
        CommitOptions::new().with_actor("level-up"),
    )?;
    assert_eq!(neo, again);
    if let Some(user) = memory.get(&neo)? {
        println!("   user {} now at level {}", neo, user.payload["level"]);
    }

    // 2. Session writes and a scoped rollback
    println!("Step 2: session rollback");
    let chat = CommitOptions::new().with_session("chat-1");
    let pref = memory.commit(
        Fact::from_json("pref", json!({"content": "vegetarian"}))?,
        chat.clone(),
    )?;
    memory.commit(
        Fact::from_json("pref", json!({"content": "steak"}))?.with_id(pref.clone()),
        chat.clone(),
    )?;
    let reverted = memory.rollback(1, Some("chat-1"))?;
    println!(
        "   reverted {} entry, preference is {}",
        reverted,
        memory.get(&pref)?.map(|f| f.payload["content"].clone()).unwrap_or_default()
    );

    // 3. Promote what the session learned, drop the scratch work
    println!("Step 3: promote and discard");
    memory.commit(
        Fact::from_json("scratch", json!({"draft": "maybe"}))?,
        chat.clone(),
    )?;
    let promoted = memory.promote_session(
        "chat-1",
        Some(&FactQuery::of_type("pref")),
        CommitOptions::new(),
    )?;
    let discarded =
        memory.discard_session("chat-1", CommitOptions::new().with_reason("chat closed"))?;
    println!("   promoted {}, discarded {}", promoted.len(), discarded);

    // 4. The operation log
    println!("Step 4: history");
    for entry in memory.history(None, 10)? {
        println!(
            "   #{} {} {} session={:?} actor={:?}",
            entry.sequence, entry.kind, entry.fact_id, entry.session_id, entry.actor
        );
    }

    memory.close()
}
