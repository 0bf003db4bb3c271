//! Agent graph end-to-end tests against the scripted chat model.

mod common;

use std::sync::Arc;

use common::{TEST_DIM, TestHarness, harness, make_chunk};
use lectern::SearchType;
use lectern::embeddings::EmbeddingClient;
use lectern::ingestion::IngestionPipeline;
use lectern::message::Role;
use lectern::service::AskRequest;
use lectern::stores::{ChunkStore, ConversationStore};
use serde_json::json;

async fn seed_course_chunks(h: &TestHarness, count: usize) {
    let pipeline = IngestionPipeline::new(
        Arc::clone(&h.embeddings) as Arc<dyn EmbeddingClient>,
        Arc::clone(&h.chunk_store) as Arc<dyn ChunkStore>,
        TEST_DIM,
    );
    let chunks = (0..count)
        .map(|i| make_chunk("C1", "S1", i, &format!("course material passage {i}")))
        .collect();
    pipeline.embed_and_save(chunks).await.unwrap();
}

fn ask(search_type: SearchType, prompt: &str) -> AskRequest {
    AskRequest {
        user_id: "U1".to_string(),
        course_id: "C1".to_string(),
        user_prompt: prompt.to_string(),
        snapshot: None,
        slide_priority: Vec::new(),
        search_type,
    }
}

#[tokio::test]
async fn rag_source_ids_form_a_gapless_prefix_across_calls() {
    let h = harness();
    seed_course_chunks(&h, 5).await;

    h.chat
        .push_tool_calls(vec![("rag_search", json!({ "query": "monopoly", "limit": 3 }))]);
    h.chat.push_tool_calls(vec![(
        "rag_search",
        json!({ "query": "monopoly pricing", "limit": 2 }),
    )]);
    h.chat
        .push_text("A monopoly is the sole seller in a market. [^1]");

    let response = h
        .service
        .ask(ask(SearchType::Rag, "What is a monopoly?"))
        .await;

    assert!(response.response.contains("[^1]"));
    let ids: Vec<&str> = response.rag_sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["1", "2", "3", "4", "5"]);
    assert!(response.web_sources.is_empty());
}

#[tokio::test]
async fn rag_and_web_counters_are_independent() {
    let h = harness();
    seed_course_chunks(&h, 3).await;

    h.chat.push_tool_calls(vec![
        ("rag_search", json!({ "query": "market structure" })),
        ("web_search", json!({ "query": "market structure news" })),
    ]);
    h.chat.push_text("Both covered. [^1] {^1}");

    let response = h
        .service
        .ask(ask(SearchType::RagWeb, "Summarize market structure"))
        .await;

    let rag_ids: Vec<&str> = response.rag_sources.iter().map(|s| s.id.as_str()).collect();
    let web_ids: Vec<&str> = response.web_sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(rag_ids, ["1", "2", "3"]);
    assert_eq!(web_ids, ["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn default_search_type_binds_and_allows_only_previous_sources() {
    let h = harness();
    seed_course_chunks(&h, 3).await;

    // The model misbehaves and calls rag_search anyway.
    h.chat
        .push_tool_calls(vec![("rag_search", json!({ "query": "anything" }))]);
    h.chat.push_text("answered from memory");

    let response = h
        .service
        .ask(ask(SearchType::Default, "What did we discuss?"))
        .await;

    // Binding was restricted...
    let first_call = h.chat.calls.lock()[0].clone();
    assert_eq!(first_call.bound_tools, vec!["retrieve_previous_sources"]);

    // ...and the stray call was rejected, not executed.
    assert!(response.rag_sources.is_empty());
    let doc = h.conversations.load("U1:C1").await.unwrap().unwrap();
    let tool_msg = doc
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("rejected tool message recorded");
    assert!(tool_msg.text().contains("not available"));
}

#[tokio::test]
async fn recursion_cap_still_produces_a_well_formed_response() {
    let h = harness();
    seed_course_chunks(&h, 5).await;

    for _ in 0..12 {
        h.chat
            .push_tool_calls(vec![("rag_search", json!({ "query": "loop" }))]);
    }

    let response = h
        .service
        .ask(ask(SearchType::Rag, "Never stop searching"))
        .await;

    // Ten node visits = five model turns, five dispatches.
    assert_eq!(h.chat.calls.lock().len(), 5);
    let ids: Vec<usize> = response
        .rag_sources
        .iter()
        .map(|s| s.id.parse().unwrap())
        .collect();
    assert_eq!(ids, (1..=25).collect::<Vec<_>>());
    // The run ended through finalize, not a crash; sources persisted.
    let doc = h.conversations.load("U1:C1").await.unwrap().unwrap();
    assert!(doc.message_count > 0);
}

#[tokio::test]
async fn snapshot_turns_synthesize_a_page_image_source() {
    let h = harness();
    h.chat.push_text("That page shows the demand curve. [^Page]");

    let mut request = ask(SearchType::Default, "What is on this page?");
    request.snapshot = Some(lectern::service::SnapshotRequest {
        slide_id: "S1".to_string(),
        page_number: 4,
        s3_key: "img/p4.png".to_string(),
    });
    let response = h.service.ask(request).await;

    assert_eq!(response.image_sources.len(), 1);
    let image = &response.image_sources[0];
    assert_eq!(image.id, "page");
    assert_eq!(image.kind, "current");
    assert_eq!(image.slide_id.as_deref(), Some("S1"));
    assert_eq!(image.page_number, Some(4));
    assert!(image.timestamp.is_some());

    // The model saw the image; the store never does.
    let first_call = h.chat.calls.lock()[0].clone();
    let sent_user = first_call.messages.last().unwrap();
    assert!(sent_user.content.has_image());

    let doc = h.conversations.load("U1:C1").await.unwrap().unwrap();
    let stored_user = doc
        .messages
        .iter()
        .find(|m| m.role == Role::User)
        .unwrap();
    assert!(!stored_user.content.has_image());
    let stored_assistant = doc
        .messages
        .iter()
        .find(|m| m.role == Role::Assistant)
        .unwrap();
    let image_ref = stored_assistant.image_source.as_ref().unwrap();
    assert_eq!(image_ref.s3_key, "img/p4.png");
    assert_eq!(image_ref.slide_id, "S1");
    assert_eq!(image_ref.page_number, 4);
}

#[tokio::test]
async fn chat_failure_yields_fallback_with_no_sources() {
    let h = harness();
    h.chat.push_error();

    let response = h.service.ask(ask(SearchType::Rag, "boom")).await;
    assert!(response.response.contains("I encountered an error"));
    assert!(response.rag_sources.is_empty());
    assert!(response.web_sources.is_empty());
    assert!(response.image_sources.is_empty());

    // The turn still persists: the question and the fallback answer.
    let doc = h.conversations.load("U1:C1").await.unwrap().unwrap();
    assert_eq!(doc.messages.len(), 2);
    assert_eq!(doc.messages[0].role, Role::User);
    assert_eq!(doc.messages[1].role, Role::Assistant);
    assert!(doc.messages[1].image_source.is_none());
}

#[tokio::test]
async fn previous_sources_rematerialize_from_an_earlier_turn() {
    let h = harness();
    seed_course_chunks(&h, 3).await;

    // Turn 1: RAG search producing three sources.
    h.chat
        .push_tool_calls(vec![("rag_search", json!({ "query": "passage", "limit": 3 }))]);
    h.chat.push_text("Covered. [^1][^2][^3]");
    h.service
        .ask(ask(SearchType::Rag, "What are the passages?"))
        .await;

    let doc = h.conversations.load("U1:C1").await.unwrap().unwrap();
    let turn1_tool_id = doc
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .and_then(|m| m.id.clone())
        .expect("turn 1 tool message id");

    // Turn 2: DEFAULT mode reaches back through retrieve_previous_sources.
    h.chat.push_tool_calls(vec![(
        "retrieve_previous_sources",
        json!({ "tool_message_ids": [turn1_tool_id] }),
    )]);
    h.chat.push_text("Recapping the earlier sources.");
    h.service
        .ask(ask(SearchType::Default, "Remind me of those sources"))
        .await;

    // Truncated history went to the model...
    let second_turn_first_call = h.chat.calls.lock()[2].clone();
    let truncated_tool = second_turn_first_call
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool message visible in history");
    assert!(truncated_tool.text().contains("retrieve_previous_sources"));
    assert!(!truncated_tool.text().contains("course material passage"));

    // ...while the tool re-materialized the full content.
    let doc = h.conversations.load("U1:C1").await.unwrap().unwrap();
    let retrieval_msg = doc
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .find(|m| m.name.as_deref() == Some("retrieve_previous_sources"))
        .expect("turn 2 tool message");
    let content: serde_json::Value = serde_json::from_str(&retrieval_msg.text()).unwrap();
    assert_eq!(content["success"], true);
    let results = content["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    for result in results {
        assert_eq!(result["from_tool_message"], json!(turn1_tool_id));
    }
}
