//! HTTP provider client tests against a mock server.

use httpmock::prelude::*;
use serde_json::json;

use lectern::embeddings::{EmbeddingClient, EmbeddingError, InputType, VoyageEmbeddings};
use lectern::message::ConversationMessage;
use lectern::providers::{ChatModel, OpenAiCompatibleChat, TavilySearch, WebSearchClient};
use lectern::tools::ToolDefinition;

#[tokio::test]
async fn embedding_client_sends_input_type_and_dimension() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/embeddings")
                .json_body_partial(r#"{"input_type": "document", "output_dimension": 4}"#);
            then.status(200).json_body(json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0, 0.0, 0.0] },
                    { "index": 0, "embedding": [1.0, 0.0, 0.0, 0.0] }
                ]
            }));
        })
        .await;

    let client = VoyageEmbeddings::with_base_url("key", "voyage-3.5-lite", server.base_url());
    let vectors = client
        .embed(
            &["first".to_string(), "second".to_string()],
            InputType::Document,
            4,
        )
        .await
        .unwrap();

    mock.assert_async().await;
    // Out-of-order provider indices land in request order.
    assert_eq!(vectors[0], vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(vectors[1], vec![0.0, 1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn embedding_auth_failures_are_fatal() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(401).body("no key");
        })
        .await;

    let client = VoyageEmbeddings::with_base_url("bad", "voyage-3.5-lite", server.base_url());
    let err = client
        .embed(&["text".to_string()], InputType::Query, 4)
        .await
        .unwrap_err();
    assert!(matches!(err, EmbeddingError::Auth { status: 401 }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn embedding_dimension_mismatch_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({
                "data": [{ "index": 0, "embedding": [1.0, 2.0] }]
            }));
        })
        .await;

    let client = VoyageEmbeddings::with_base_url("key", "voyage-3.5-lite", server.base_url());
    let err = client
        .embed(&["text".to_string()], InputType::Document, 4)
        .await
        .unwrap_err();
    assert!(matches!(err, EmbeddingError::Malformed(_)));
}

#[tokio::test]
async fn embedding_server_errors_are_transient() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(503);
        })
        .await;

    let client = VoyageEmbeddings::with_base_url("key", "voyage-3.5-lite", server.base_url());
    let err = client
        .embed(&["text".to_string()], InputType::Document, 4)
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn chat_client_binds_tools_and_decodes_tool_calls() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .json_body_partial(r#"{"tool_choice": "auto"}"#);
            then.status(200).json_body(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call-1",
                            "type": "function",
                            "function": {
                                "name": "rag_search",
                                "arguments": "{\"query\": \"monopoly\"}"
                            }
                        }]
                    }
                }]
            }));
        })
        .await;

    let client = OpenAiCompatibleChat::with_base_url("key", "test-model", server.base_url());
    let tools = vec![ToolDefinition {
        name: "rag_search".to_string(),
        description: "course search".to_string(),
        parameters: json!({ "type": "object" }),
    }];
    let assistant = client
        .complete(
            "system prompt",
            &[ConversationMessage::user("What is a monopoly?")],
            &tools,
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(assistant.tool_calls.len(), 1);
    assert_eq!(assistant.tool_calls[0].name, "rag_search");
    assert_eq!(assistant.tool_calls[0].arguments["query"], "monopoly");
}

#[tokio::test]
async fn chat_plain_answers_decode_to_text() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{
                    "message": { "role": "assistant", "content": "A monopoly is... [^1]" }
                }]
            }));
        })
        .await;

    let client = OpenAiCompatibleChat::with_base_url("key", "test-model", server.base_url());
    let assistant = client
        .complete("system", &[ConversationMessage::user("q")], &[])
        .await
        .unwrap();
    assert_eq!(assistant.text(), "A monopoly is... [^1]");
    assert!(assistant.tool_calls.is_empty());
}

#[tokio::test]
async fn web_search_truncates_to_max_results() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/search");
            then.status(200).json_body(json!({
                "results": [
                    { "title": "One", "url": "https://a", "content": "c1", "score": 0.9 },
                    { "title": "Two", "url": "https://b", "content": "c2", "score": 0.8 },
                    { "title": "Three", "url": "https://c", "content": "c3", "score": 0.7 }
                ]
            }));
        })
        .await;

    let client = TavilySearch::with_base_url("key", server.base_url());
    let results = client.search("query", 2).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].title, "One");
}
