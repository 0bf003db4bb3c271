//! Conversation message model.
//!
//! Messages are the unit of exchange between the user, the chat model, and
//! the tool dispatcher, and the unit of persistence in the conversation
//! store. Assistant messages additionally carry tool calls and, once a run
//! finalizes, references to the tool messages their citations came from.

use serde::{Deserialize, Serialize};

/// Role of a message sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// One part of a multimodal user message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
}

/// Message content: plain text, or parts for user messages carrying an
/// image reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of the content, ignoring image parts.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// True when any part references an image.
    #[must_use]
    pub fn has_image(&self) -> bool {
        matches!(self, MessageContent::Parts(parts)
            if parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })))
    }
}

/// A tool invocation requested by the assistant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Reference to the page image a snapshot-bearing turn was about.
///
/// Lives on the assistant message; the raw image never persists with the
/// user message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageSourceRef {
    pub s3_key: String,
    pub slide_id: String,
    pub page_number: u32,
}

/// A single conversation message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    /// Stable UUID; assigned before persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Tool name on tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: MessageContent,
    /// Tool invocations requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// IDs of the rag_search tool messages backing this assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rag_source_ids: Vec<String>,
    /// IDs of the web_search tool messages backing this assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_source_ids: Vec<String>,
    /// Snapshot reference for the turn this assistant message answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_source: Option<ImageSourceRef>,
    /// Identifier of the tool call a tool message responds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ConversationMessage {
    fn base(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            id: None,
            name: None,
            content,
            tool_calls: Vec::new(),
            rag_source_ids: Vec::new(),
            web_source_ids: Vec::new(),
            image_source: None,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::base(Role::User, MessageContent::Text(text.into()))
    }

    /// User message carrying both a question and an image reference.
    #[must_use]
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self::base(
            Role::User,
            MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    url: image_url.into(),
                },
            ]),
        )
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::base(Role::Assistant, MessageContent::Text(text.into()))
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::base(Role::System, MessageContent::Text(text.into()))
    }

    /// Tool response message. The id is assigned by the tool dispatcher.
    #[must_use]
    pub fn tool(
        id: impl Into<String>,
        name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::base(Role::Tool, MessageContent::Text(content.into()));
        msg.id = Some(id.into());
        msg.name = Some(name.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Concatenated text of the message content.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.text()
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Drop image parts from user-message content, collapsing to plain text.
    ///
    /// Applied on every persistence path; the image reference survives only
    /// as `image_source` on the corresponding assistant message.
    #[must_use]
    pub fn without_image_parts(mut self) -> Self {
        if self.role == Role::User && self.content.has_image() {
            self.content = MessageContent::Text(self.content.text());
        }
        self
    }
}
