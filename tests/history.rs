//! State-manager tests: dual-store persistence, truncation projection,
//! idempotent append, advisory cache behavior.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lectern::StateManager;
use lectern::agent::SourcesEntry;
use lectern::history::MAX_STORED_MESSAGES;
use lectern::message::{ConversationMessage, Role};
use lectern::stores::memory::{MemoryCache, MemoryConversationStore};
use lectern::stores::{CacheStore, ConversationStore, StoreError};
use rustc_hash::FxHashMap;
use serde_json::json;

fn manager() -> (StateManager, Arc<MemoryConversationStore>, Arc<MemoryCache>) {
    let primary = Arc::new(MemoryConversationStore::new());
    let cache = Arc::new(MemoryCache::new());
    let manager = StateManager::new(
        Arc::clone(&primary) as Arc<dyn ConversationStore>,
        Arc::clone(&cache) as Arc<dyn CacheStore>,
    );
    (manager, primary, cache)
}

fn turn(question: &str, answer: &str, assistant_id: &str) -> Vec<ConversationMessage> {
    let mut user = ConversationMessage::user(question);
    user.id = Some(format!("u-{assistant_id}"));
    let mut assistant = ConversationMessage::assistant(answer);
    assistant.id = Some(assistant_id.to_string());
    vec![user, assistant]
}

fn tool_message(id: &str, result_count: usize) -> ConversationMessage {
    let results: Vec<_> = (0..result_count)
        .map(|i| json!({ "id": (i + 1).to_string(), "text": format!("full text {i}") }))
        .collect();
    ConversationMessage::tool(
        id,
        "rag_search",
        "call-1",
        json!({ "success": true, "results": results }).to_string(),
    )
}

#[tokio::test]
async fn history_truncates_tool_content_but_store_keeps_it() {
    let (manager, _, _) = manager();

    let mut messages = turn("q", "a [^1]", "a1");
    messages.insert(1, tool_message("t1", 3));
    manager
        .append_messages("U1", "C1", messages, &FxHashMap::default())
        .await
        .unwrap();

    let history = manager.get_conversation_history("U1", "C1", 50).await;
    let tool = history.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool.text().contains("\"result_count\":3"));
    assert!(tool.text().contains("retrieve_previous_sources"));
    assert!(!tool.text().contains("full text"));

    let records = manager
        .get_tool_messages("U1", "C1", &["t1".to_string()])
        .await;
    let record = records.get("t1").unwrap();
    assert_eq!(record.tool_name.as_deref(), Some("rag_search"));
    assert_eq!(record.content["results"].as_array().unwrap().len(), 3);
    assert_eq!(record.tool_call_id.as_deref(), Some("call-1"));
}

#[tokio::test]
async fn append_is_idempotent_for_identical_resubmission() {
    let (manager, primary, _) = manager();

    let messages = turn("q", "a", "a1");
    manager
        .append_messages("U1", "C1", messages.clone(), &FxHashMap::default())
        .await
        .unwrap();
    manager
        .append_messages("U1", "C1", messages, &FxHashMap::default())
        .await
        .unwrap();

    let doc = primary.load("U1:C1").await.unwrap().unwrap();
    assert_eq!(doc.message_count, 2);
}

#[tokio::test]
async fn sources_survive_cache_miss() {
    let (manager, primary, _) = manager();

    let mut sources = FxHashMap::default();
    sources.insert(
        "a1".to_string(),
        SourcesEntry {
            rag_source_ids: vec!["t1".to_string(), "t2".to_string()],
            web_source_ids: Vec::new(),
            s3_key: None,
            slide_id: None,
            page_number: None,
            timestamp: "2026-02-01T00:00:00Z".to_string(),
        },
    );
    manager
        .append_messages("U1", "C1", turn("q", "a", "a1"), &sources)
        .await
        .unwrap();

    // Warm path (cache hit).
    let cached = manager
        .get_sources_for_messages("U1", "C1", &["a1".to_string()])
        .await;
    assert_eq!(cached["a1"].rag_source_ids, vec!["t1", "t2"]);

    // Cold path: same primary store behind a fresh, empty cache.
    let cold_manager = StateManager::new(
        Arc::clone(&primary) as Arc<dyn ConversationStore>,
        Arc::new(MemoryCache::new()) as Arc<dyn CacheStore>,
    );
    let cold = cold_manager
        .get_sources_for_messages("U1", "C1", &["a1".to_string()])
        .await;
    assert_eq!(cold["a1"].rag_source_ids, vec!["t1", "t2"]);
}

#[tokio::test]
async fn later_sources_merge_and_earlier_ones_survive_rewrites() {
    let (manager, primary, _) = manager();

    let mut first = FxHashMap::default();
    first.insert(
        "a1".to_string(),
        SourcesEntry {
            rag_source_ids: vec!["t1".to_string()],
            ..Default::default()
        },
    );
    manager
        .append_messages("U1", "C1", turn("q1", "a1 text", "a1"), &first)
        .await
        .unwrap();

    let mut second = FxHashMap::default();
    second.insert(
        "a2".to_string(),
        SourcesEntry {
            web_source_ids: vec!["t9".to_string()],
            ..Default::default()
        },
    );
    manager
        .append_messages("U1", "C1", turn("q2", "a2 text", "a2"), &second)
        .await
        .unwrap();

    let doc = primary.load("U1:C1").await.unwrap().unwrap();
    let a1 = doc.messages.iter().find(|m| m.id.as_deref() == Some("a1")).unwrap();
    assert_eq!(a1.rag_source_ids, vec!["t1"]);
    let a2 = doc.messages.iter().find(|m| m.id.as_deref() == Some("a2")).unwrap();
    assert_eq!(a2.web_source_ids, vec!["t9"]);
}

#[tokio::test]
async fn stored_messages_cap_at_the_newest_hundred() {
    let (manager, primary, _) = manager();

    for i in 0..70 {
        manager
            .append_messages(
                "U1",
                "C1",
                turn(&format!("q{i}"), &format!("a{i}"), &format!("id-{i}")),
                &FxHashMap::default(),
            )
            .await
            .unwrap();
    }

    let doc = primary.load("U1:C1").await.unwrap().unwrap();
    assert_eq!(doc.message_count, MAX_STORED_MESSAGES);
    assert_eq!(doc.messages.len(), MAX_STORED_MESSAGES);
    // The newest turn survived; the oldest did not.
    assert!(doc.messages.iter().any(|m| m.id.as_deref() == Some("id-69")));
    assert!(!doc.messages.iter().any(|m| m.id.as_deref() == Some("id-0")));
}

#[tokio::test]
async fn list_conversations_summarizes_threads_newest_first() {
    let (manager, _, _) = manager();

    manager
        .append_messages(
            "U1",
            "C1",
            turn("q1", "an answer about markets", "a1"),
            &FxHashMap::default(),
        )
        .await
        .unwrap();
    let long_answer = "m".repeat(150);
    manager
        .append_messages("U1", "C2", turn("q2", &long_answer, "a2"), &FxHashMap::default())
        .await
        .unwrap();
    manager
        .append_messages("U2", "C1", turn("q3", "someone else", "a3"), &FxHashMap::default())
        .await
        .unwrap();

    let summaries = manager.list_conversations("U1").await;
    assert_eq!(summaries.len(), 2);
    for pair in summaries.windows(2) {
        assert!(pair[0].updated_at >= pair[1].updated_at);
    }

    let c1 = summaries.iter().find(|s| s.course_id == "C1").unwrap();
    assert_eq!(c1.thread_id, "U1:C1");
    assert_eq!(c1.last_message, "an answer about markets");
    assert_eq!(c1.message_count, 2);

    let c2 = summaries.iter().find(|s| s.course_id == "C2").unwrap();
    assert!(c2.last_message.ends_with("..."));
    assert!(c2.last_message.len() < long_answer.len());

    assert!(manager.list_conversations("unknown-user").await.is_empty());
}

#[tokio::test]
async fn threads_ending_on_a_tool_message_have_empty_previews() {
    let (manager, _, _) = manager();

    let mut messages = turn("q", "a", "a1");
    messages.push(tool_message("t1", 1));
    manager
        .append_messages("U1", "C1", messages, &FxHashMap::default())
        .await
        .unwrap();

    let summaries = manager.list_conversations("U1").await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].last_message, "");
    assert_eq!(summaries[0].message_count, 3);
}

#[tokio::test]
async fn clear_removes_primary_and_cache_state() {
    let (manager, primary, cache) = manager();

    manager
        .append_messages("U1", "C1", turn("q", "a", "a1"), &FxHashMap::default())
        .await
        .unwrap();
    assert!(manager.clear("U1", "C1").await.unwrap());

    assert!(primary.load("U1:C1").await.unwrap().is_none());
    assert!(cache.get("agent_state:U1:C1").await.unwrap().is_none());
    assert!(manager.get_conversation_history("U1", "C1", 50).await.is_empty());
    // Clearing an absent thread is not an error.
    assert!(!manager.clear("U1", "C1").await.unwrap());
}

/// A cache that is always down.
struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Backend {
            message: "cache offline".to_string(),
        })
    }
    async fn set_ex(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
        Err(StoreError::Backend {
            message: "cache offline".to_string(),
        })
    }
    async fn delete(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend {
            message: "cache offline".to_string(),
        })
    }
    async fn hget(&self, _: &str, _: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Backend {
            message: "cache offline".to_string(),
        })
    }
    async fn hset(&self, _: &str, _: &str, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Backend {
            message: "cache offline".to_string(),
        })
    }
    async fn hgetall(&self, _: &str) -> Result<FxHashMap<String, String>, StoreError> {
        Err(StoreError::Backend {
            message: "cache offline".to_string(),
        })
    }
    async fn expire(&self, _: &str, _: Duration) -> Result<(), StoreError> {
        Err(StoreError::Backend {
            message: "cache offline".to_string(),
        })
    }
}

#[tokio::test]
async fn an_unavailable_cache_never_fails_reads_or_writes() {
    let primary = Arc::new(MemoryConversationStore::new());
    let manager = StateManager::new(
        Arc::clone(&primary) as Arc<dyn ConversationStore>,
        Arc::new(BrokenCache) as Arc<dyn CacheStore>,
    );

    let mut sources = FxHashMap::default();
    sources.insert(
        "a1".to_string(),
        SourcesEntry {
            rag_source_ids: vec!["t1".to_string()],
            ..Default::default()
        },
    );
    manager
        .append_messages("U1", "C1", turn("q", "a", "a1"), &sources)
        .await
        .unwrap();

    let history = manager.get_conversation_history("U1", "C1", 50).await;
    assert_eq!(history.len(), 2);

    let found = manager
        .get_sources_for_messages("U1", "C1", &["a1".to_string()])
        .await;
    assert_eq!(found["a1"].rag_source_ids, vec!["t1"]);

    assert!(manager.clear("U1", "C1").await.unwrap());
}
