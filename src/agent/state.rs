//! Run state for the conversation agent.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::sources::{ImageSource, RagSource, SourcesEntry, WebSource};
use crate::message::ConversationMessage;

/// Which tools the run may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchType {
    Default,
    Rag,
    Web,
    RagWeb,
}

impl SearchType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Default => "DEFAULT",
            SearchType::Rag => "RAG",
            SearchType::Web => "WEB",
            SearchType::RagWeb => "RAG_WEB",
        }
    }
}

impl FromStr for SearchType {
    type Err = String;

    /// Strict parse: an unknown value is an input error at the boundary,
    /// never silently downgraded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEFAULT" => Ok(SearchType::Default),
            "RAG" => Ok(SearchType::Rag),
            "WEB" => Ok(SearchType::Web),
            "RAG_WEB" => Ok(SearchType::RagWeb),
            other => Err(format!("unknown search_type: {other}")),
        }
    }
}

/// Reference to the page image the user is currently viewing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub slide_id: String,
    pub page_number: u32,
    pub s3_key: String,
    /// Presigned read URL handed to the chat model; resolved by the service
    /// before the run starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_url: Option<String>,
}

/// Mutable state threaded through the agent graph.
///
/// The source counters live here, not in any global: renumbering is a
/// property of the run.
#[derive(Clone, Debug)]
pub struct AgentState {
    pub messages: Vec<ConversationMessage>,
    pub course_id: String,
    pub user_id: String,
    pub slides_priority: Vec<String>,
    pub search_type: SearchType,
    pub snapshot: Option<Snapshot>,

    pub rag_counter: u64,
    pub web_counter: u64,

    pub rag_sources: Vec<RagSource>,
    pub web_sources: Vec<WebSource>,
    pub image_sources: Vec<ImageSource>,
    /// Per-assistant-message source references, filled on finalize.
    pub sources_map: FxHashMap<String, SourcesEntry>,
    pub final_response: Option<String>,

    /// Boundary between loaded history and messages added by this run.
    pub history_len: usize,
}

impl AgentState {
    /// State for a fresh run: loaded history plus the incoming user message.
    #[must_use]
    pub fn new(
        history: Vec<ConversationMessage>,
        user_message: ConversationMessage,
        course_id: impl Into<String>,
        user_id: impl Into<String>,
        slides_priority: Vec<String>,
        search_type: SearchType,
        snapshot: Option<Snapshot>,
    ) -> Self {
        let history_len = history.len();
        let mut messages = history;
        messages.push(user_message);
        Self {
            messages,
            course_id: course_id.into(),
            user_id: user_id.into(),
            slides_priority,
            search_type,
            snapshot,
            rag_counter: 0,
            web_counter: 0,
            rag_sources: Vec::new(),
            web_sources: Vec::new(),
            image_sources: Vec::new(),
            sources_map: FxHashMap::default(),
            final_response: None,
            history_len,
        }
    }

    /// Messages appended during this run (everything past the loaded
    /// history, including the user message that started it).
    #[must_use]
    pub fn new_messages(&self) -> &[ConversationMessage] {
        &self.messages[self.history_len..]
    }

    #[must_use]
    pub fn last_message(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }
}
