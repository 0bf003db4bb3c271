//! The agent graph's three nodes.
//!
//! Nodes take the run state, do their work, and hand back the updated state
//! plus the next route. Fatal errors stop the run; tool-level failures are
//! data (failure envelopes the model can see), never node errors.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::prompts;
use super::sources::{ImageSource, RagSource, SourcePacket, SourcesEntry, WebSource};
use super::state::AgentState;
use crate::message::{ConversationMessage, Role};
use crate::providers::{ChatError, ChatModel};
use crate::retry;
use crate::tools::{RAG_SEARCH, Tool, WEB_SEARCH, allowed_tool_names, failure};

/// Where the runner goes next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRoute {
    Agent,
    Tools,
    FormatResponse,
    End,
}

/// Fatal node failures.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// The chat model failed after bounded retries.
    #[error("chat model failure: {0}")]
    #[diagnostic(code(lectern::agent::chat))]
    Chat(#[from] ChatError),
}

/// A single unit of work in the agent graph.
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, state: AgentState) -> Result<(AgentState, NodeRoute), NodeError>;
}

/// Invokes the chat model with the tool set restricted to the active
/// search type and appends the assistant's message.
pub struct LlmNode {
    chat: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
}

impl LlmNode {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatModel>, tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { chat, tools }
    }
}

#[async_trait]
impl Node for LlmNode {
    async fn run(&self, mut state: AgentState) -> Result<(AgentState, NodeRoute), NodeError> {
        let allowed = allowed_tool_names(state.search_type);
        let definitions: Vec<_> = self
            .tools
            .iter()
            .filter(|tool| allowed.contains(&tool.name()))
            .map(|tool| tool.definition())
            .collect();

        let system = prompts::system_prompt(
            state.search_type,
            &state.course_id,
            &state.slides_priority,
            state.snapshot.is_some(),
        );

        let mut assistant = retry::with_backoff(
            "chat completion",
            retry::MAX_ATTEMPTS,
            retry::BASE_DELAY,
            ChatError::is_transient,
            || self.chat.complete(&system, &state.messages, &definitions),
        )
        .await?;
        // Stable IDs are assigned before any write ever happens.
        if assistant.id.is_none() {
            assistant.id = Some(Uuid::new_v4().to_string());
        }

        let route = if assistant.has_tool_calls() {
            NodeRoute::Tools
        } else {
            NodeRoute::FormatResponse
        };
        debug!(
            target: "lectern::agent",
            tool_calls = assistant.tool_calls.len(),
            "assistant turn complete"
        );
        state.messages.push(assistant);
        Ok((state, route))
    }
}

/// Executes the last assistant message's tool calls sequentially and
/// renumbers successful source IDs through the run counters.
pub struct ToolDispatchNode {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolDispatchNode {
    #[must_use]
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Rewrite the envelope's result IDs to continue the monotone sequence,
    /// returning the advanced counter.
    fn renumber(envelope: &mut Value, counter: u64) -> u64 {
        let Some(results) = envelope.get_mut("results").and_then(Value::as_array_mut) else {
            return counter;
        };
        let mut next = counter;
        for result in results.iter_mut() {
            next += 1;
            if let Some(obj) = result.as_object_mut() {
                obj.insert("id".to_string(), Value::String(next.to_string()));
            }
        }
        next
    }
}

#[async_trait]
impl Node for ToolDispatchNode {
    async fn run(&self, mut state: AgentState) -> Result<(AgentState, NodeRoute), NodeError> {
        let calls = state
            .last_message()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();
        let allowed = allowed_tool_names(state.search_type);

        for call in calls {
            let mut envelope = if !allowed.contains(&call.name.as_str()) {
                warn!(
                    target: "lectern::agent",
                    tool = %call.name,
                    search_type = state.search_type.as_str(),
                    "rejecting tool not bound for this search type"
                );
                failure(format!(
                    "tool '{}' is not available for search type {}",
                    call.name,
                    state.search_type.as_str()
                ))
            } else {
                match self.tools.iter().find(|t| t.name() == call.name) {
                    Some(tool) => tool.call(call.arguments.clone()).await,
                    None => failure(format!("unknown tool '{}'", call.name)),
                }
            };

            let succeeded =
                envelope.get("success").and_then(Value::as_bool) == Some(true);
            if succeeded {
                match call.name.as_str() {
                    RAG_SEARCH => {
                        state.rag_counter = Self::renumber(&mut envelope, state.rag_counter);
                    }
                    WEB_SEARCH => {
                        state.web_counter = Self::renumber(&mut envelope, state.web_counter);
                    }
                    _ => {}
                }
            }

            state.messages.push(ConversationMessage::tool(
                Uuid::new_v4().to_string(),
                call.name.clone(),
                call.id.clone(),
                envelope.to_string(),
            ));
        }

        Ok((state, NodeRoute::Agent))
    }
}

/// Collects this turn's tool packets into the response source lists and the
/// per-assistant sources map.
pub struct FormatResponseNode;

#[async_trait]
impl Node for FormatResponseNode {
    async fn run(&self, mut state: AgentState) -> Result<(AgentState, NodeRoute), NodeError> {
        let Some(assistant_idx) = state
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            state.final_response = Some(String::new());
            return Ok((state, NodeRoute::End));
        };

        // Only tool messages from the current turn: between the last user
        // message preceding the final assistant message and the end.
        let turn_start = state.messages[..assistant_idx]
            .iter()
            .rposition(|m| m.role == Role::User)
            .unwrap_or(0);

        let mut rag_tool_message_ids: Vec<String> = Vec::new();
        let mut web_tool_message_ids: Vec<String> = Vec::new();
        for message in &state.messages[turn_start..] {
            let Some(packet) = SourcePacket::parse(message) else {
                continue;
            };
            if !packet.success {
                continue;
            }
            match packet.tool_name.as_str() {
                RAG_SEARCH => {
                    rag_tool_message_ids.push(packet.tool_message_id.clone());
                    for result in &packet.results {
                        match serde_json::from_value::<RagSource>(result.clone()) {
                            Ok(source) => state.rag_sources.push(source),
                            Err(err) => {
                                warn!(target: "lectern::agent", %err, "bad rag source shape")
                            }
                        }
                    }
                }
                WEB_SEARCH => {
                    web_tool_message_ids.push(packet.tool_message_id.clone());
                    for result in &packet.results {
                        match serde_json::from_value::<WebSource>(result.clone()) {
                            Ok(source) => state.web_sources.push(source),
                            Err(err) => {
                                warn!(target: "lectern::agent", %err, "bad web source shape")
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let assistant_id = match &state.messages[assistant_idx].id {
            Some(id) => id.clone(),
            None => {
                let id = Uuid::new_v4().to_string();
                state.messages[assistant_idx].id = Some(id.clone());
                id
            }
        };
        state.messages[assistant_idx].rag_source_ids = rag_tool_message_ids.clone();
        state.messages[assistant_idx].web_source_ids = web_tool_message_ids.clone();

        let timestamp = Utc::now().to_rfc3339();
        if let Some(snapshot) = &state.snapshot {
            state.image_sources.push(ImageSource {
                id: "page".to_string(),
                kind: "current".to_string(),
                message_id: None,
                timestamp: Some(timestamp.clone()),
                slide_id: Some(snapshot.slide_id.clone()),
                page_number: Some(snapshot.page_number),
            });
        }

        let has_sources = !rag_tool_message_ids.is_empty()
            || !web_tool_message_ids.is_empty()
            || state.snapshot.is_some();
        if has_sources {
            state.sources_map.insert(
                assistant_id,
                SourcesEntry {
                    rag_source_ids: rag_tool_message_ids,
                    web_source_ids: web_tool_message_ids,
                    s3_key: state.snapshot.as_ref().map(|s| s.s3_key.clone()),
                    slide_id: state.snapshot.as_ref().map(|s| s.slide_id.clone()),
                    page_number: state.snapshot.as_ref().map(|s| s.page_number),
                    timestamp,
                },
            );
        }

        state.final_response = Some(state.messages[assistant_idx].text());
        Ok((state, NodeRoute::End))
    }
}
