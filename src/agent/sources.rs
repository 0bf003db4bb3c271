//! Citation source types and per-tool-call packets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ConversationMessage, Role};

/// A course-material source cited as `[^n]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RagSource {
    pub id: String,
    pub slide: String,
    pub s3file: String,
    pub start: String,
    pub end: String,
    pub text: String,
    #[serde(default)]
    pub score: f32,
}

/// A web source cited as `{^n}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    pub id: String,
    pub title: String,
    pub url: String,
    pub text: String,
    #[serde(default)]
    pub score: f32,
}

/// The snapshot source cited as `[^Page]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

/// Source references recorded per assistant message in the sources map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcesEntry {
    #[serde(default)]
    pub rag_source_ids: Vec<String>,
    #[serde(default)]
    pub web_source_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub timestamp: String,
}

/// Parsed form of one tool message: the renumbered JSON a tool call left
/// behind.
#[derive(Clone, Debug)]
pub struct SourcePacket {
    pub tool_name: String,
    pub tool_message_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub results: Vec<Value>,
}

impl SourcePacket {
    /// Parse a tool message's JSON content. Returns `None` for non-tool
    /// messages or unparseable content.
    #[must_use]
    pub fn parse(message: &ConversationMessage) -> Option<SourcePacket> {
        if message.role != Role::Tool {
            return None;
        }
        let content: Value = serde_json::from_str(&message.text()).ok()?;
        Some(SourcePacket {
            tool_name: message.name.clone().unwrap_or_default(),
            tool_message_id: message.id.clone().unwrap_or_default(),
            success: content.get("success").and_then(Value::as_bool).unwrap_or(false),
            error: content
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
            results: content
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
    }
}
