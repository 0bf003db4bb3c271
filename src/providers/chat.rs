//! Tool-aware chat completion seam and an OpenAI-compatible HTTP client.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::instrument;

use crate::message::{ContentPart, ConversationMessage, MessageContent, Role, ToolCall};
use crate::tools::ToolDefinition;

/// Errors from the chat-completion provider.
#[derive(Debug, Error, Diagnostic)]
pub enum ChatError {
    /// Network-level failure; retryable.
    #[error("chat transport error: {0}")]
    #[diagnostic(code(lectern::chat::transport))]
    Transport(String),

    /// Credential rejected; fatal.
    #[error("chat provider rejected credentials (status {status})")]
    #[diagnostic(code(lectern::chat::auth), help("Check LLM_API_KEY."))]
    Auth { status: u16 },

    /// Request rejected; fatal.
    #[error("chat provider rejected the request (status {status}): {message}")]
    #[diagnostic(code(lectern::chat::bad_request))]
    BadRequest { status: u16, message: String },

    /// Rate limiting or server-side failure; retryable.
    #[error("chat provider unavailable (status {status})")]
    #[diagnostic(code(lectern::chat::unavailable))]
    Unavailable { status: u16 },

    /// Unusable response payload.
    #[error("malformed chat response: {0}")]
    #[diagnostic(code(lectern::chat::malformed))]
    Malformed(String),
}

impl ChatError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Transport(_) | ChatError::Unavailable { .. })
    }
}

/// Tool-aware chat completion.
///
/// Implementations receive the full ordered message history plus the tool
/// definitions bound for this call and return one assistant message, with
/// tool calls when the model requests them. No streaming.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        messages: &[ConversationMessage],
        tools: &[ToolDefinition],
    ) -> Result<ConversationMessage, ChatError>;
}

/// Client for any OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct OpenAiCompatibleChat {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatibleChat {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, Self::DEFAULT_BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.3,
            max_tokens: 4096,
        }
    }

    fn encode_message(message: &ConversationMessage) -> Value {
        let mut encoded = json!({ "role": message.role.as_str() });
        match (&message.content, message.role) {
            (MessageContent::Parts(parts), Role::User) => {
                let wire: Vec<Value> = parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                        ContentPart::ImageUrl { url } => {
                            json!({ "type": "image_url", "image_url": { "url": url } })
                        }
                    })
                    .collect();
                encoded["content"] = Value::Array(wire);
            }
            _ => {
                encoded["content"] = Value::String(message.text());
            }
        }
        if message.role == Role::Assistant && !message.tool_calls.is_empty() {
            encoded["tool_calls"] = Value::Array(
                message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            },
                        })
                    })
                    .collect(),
            );
        }
        if let Some(tool_call_id) = &message.tool_call_id {
            encoded["tool_call_id"] = Value::String(tool_call_id.clone());
        }
        encoded
    }

    fn decode_assistant(message: &Value) -> Result<ConversationMessage, ChatError> {
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut assistant = ConversationMessage::assistant(content);

        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ChatError::Malformed("tool call without id".to_string()))?;
                let function = call
                    .get("function")
                    .ok_or_else(|| ChatError::Malformed("tool call without function".to_string()))?;
                let name = function
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ChatError::Malformed("tool call without name".to_string()))?;
                let arguments = match function.get("arguments") {
                    Some(Value::String(raw)) => {
                        serde_json::from_str(raw).unwrap_or(Value::String(raw.clone()))
                    }
                    Some(other) => other.clone(),
                    None => json!({}),
                };
                assistant.tool_calls.push(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                });
            }
        }
        Ok(assistant)
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleChat {
    #[instrument(skip_all, fields(messages = messages.len(), tools = tools.len()))]
    async fn complete(
        &self,
        system: &str,
        messages: &[ConversationMessage],
        tools: &[ToolDefinition],
    ) -> Result<ConversationMessage, ChatError> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        wire_messages.push(json!({ "role": "system", "content": system }));
        wire_messages.extend(messages.iter().map(Self::encode_message));

        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            },
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = Value::String("auto".to_string());
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(match code {
                401 | 403 => ChatError::Auth { status: code },
                400 | 404 | 422 => ChatError::BadRequest {
                    status: code,
                    message: body,
                },
                _ => ChatError::Unavailable { status: code },
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Malformed(e.to_string()))?;
        let message = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| ChatError::Malformed("response without choices".to_string()))?;
        Self::decode_assistant(message)
    }
}
