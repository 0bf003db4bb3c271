//! Conversation + source persistence across a cache/primary store pair.
//!
//! The primary store is authoritative; the cache holds a TTL'd copy and is
//! purely advisory: every read path tolerates a miss, corruption, or an
//! unavailable cache by falling through to the primary store, and every
//! write path succeeds against the primary store before touching the cache.
//!
//! Tool messages persist in full in the primary store only. History served
//! to the agent replaces tool content with a short summary at read time;
//! the stored documents are never mutated by that projection.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::agent::sources::SourcesEntry;
use crate::message::{ConversationMessage, ImageSourceRef, Role};
use crate::stores::{CacheStore, ConversationStore, StoreError, ThreadDocument};

/// Cache key prefix for serialized message lists.
const STATE_PREFIX: &str = "agent_state:";
/// Cache key prefix for per-assistant source hashes.
const SOURCES_PREFIX: &str = "agent_sources:";

/// Cache TTL for conversation state.
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Deadline for any single cache read; expiry falls through to the primary
/// store, never to an error.
pub const CACHE_DEADLINE: Duration = Duration::from_secs(2);
/// Hard cap on stored messages per thread (newest kept).
pub const MAX_STORED_MESSAGES: usize = 100;
/// Default history slice served to the agent.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
/// Character budget for the last-message preview in thread summaries.
const PREVIEW_CHARS: usize = 100;

/// Full tool message content as stored in the primary store.
#[derive(Clone, Debug)]
pub struct ToolMessageRecord {
    pub tool_name: Option<String>,
    pub content: Value,
    pub tool_call_id: Option<String>,
}

/// Summary of one conversation thread, for cross-course listings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub thread_id: String,
    pub course_id: String,
    /// Preview of the newest user/assistant message, or empty.
    pub last_message: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct CachedState {
    messages: Vec<ConversationMessage>,
}

/// Durable conversation and source persistence.
pub struct StateManager {
    primary: Arc<dyn ConversationStore>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    cache_deadline: Duration,
}

impl StateManager {
    #[must_use]
    pub fn new(primary: Arc<dyn ConversationStore>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            primary,
            cache,
            ttl: CACHE_TTL,
            cache_deadline: CACHE_DEADLINE,
        }
    }

    /// Thread identity for a `(user, course)` pair.
    #[must_use]
    pub fn thread_id(user_id: &str, course_id: &str) -> String {
        format!("{user_id}:{course_id}")
    }

    fn state_key(thread_id: &str) -> String {
        format!("{STATE_PREFIX}{thread_id}")
    }

    fn sources_key(thread_id: &str) -> String {
        format!("{SOURCES_PREFIX}{thread_id}")
    }

    async fn cache_get(&self, key: &str) -> Option<String> {
        match tokio::time::timeout(self.cache_deadline, self.cache.get(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!(target: "lectern::history", %err, key, "cache read failed");
                None
            }
            Err(_) => {
                warn!(target: "lectern::history", key, "cache read timed out");
                None
            }
        }
    }

    async fn cache_hget(&self, key: &str, field: &str) -> Option<String> {
        match tokio::time::timeout(self.cache_deadline, self.cache.hget(key, field)).await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!(target: "lectern::history", %err, key, "cache hash read failed");
                None
            }
            Err(_) => {
                warn!(target: "lectern::history", key, "cache hash read timed out");
                None
            }
        }
    }

    /// Conversation history for the agent, newest `limit` messages, with
    /// tool content truncated. Degrades to an empty history rather than
    /// failing the request.
    pub async fn get_conversation_history(
        &self,
        user_id: &str,
        course_id: &str,
        limit: usize,
    ) -> Vec<ConversationMessage> {
        let thread_id = Self::thread_id(user_id, course_id);
        let state_key = Self::state_key(&thread_id);

        if let Some(raw) = self.cache_get(&state_key).await {
            match serde_json::from_str::<CachedState>(&raw) {
                Ok(state) => {
                    debug!(target: "lectern::history", thread_id, "history served from cache");
                    return Self::tail_truncated(state.messages, limit);
                }
                Err(err) => {
                    warn!(target: "lectern::history", %err, thread_id, "cache payload corrupt");
                }
            }
        }

        match self.primary.load(&thread_id).await {
            Ok(Some(doc)) => {
                // Warm the cache with the raw (untruncated) message list.
                let payload = CachedState {
                    messages: doc.messages.clone(),
                };
                if let Ok(serialized) = serde_json::to_string(&payload)
                    && let Err(err) = self.cache.set_ex(&state_key, &serialized, self.ttl).await
                {
                    warn!(target: "lectern::history", %err, thread_id, "cache warm failed");
                }
                Self::tail_truncated(doc.messages, limit)
            }
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(target: "lectern::history", %err, thread_id, "primary history read failed");
                Vec::new()
            }
        }
    }

    fn tail_truncated(
        messages: Vec<ConversationMessage>,
        limit: usize,
    ) -> Vec<ConversationMessage> {
        let skip = messages.len().saturating_sub(limit);
        messages
            .into_iter()
            .skip(skip)
            .map(Self::truncate_tool_content)
            .collect()
    }

    /// The read-time projection applied to tool messages in history.
    #[must_use]
    pub fn truncate_tool_content(message: ConversationMessage) -> ConversationMessage {
        if message.role != Role::Tool {
            return message;
        }
        let tool = message.name.clone().unwrap_or_else(|| "unknown".to_string());
        let summary = match serde_json::from_str::<Value>(&message.text()) {
            Ok(content) if content.get("success").and_then(Value::as_bool) == Some(true) => {
                let count = content
                    .get("results")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                json!({
                    "success": true,
                    "tool": tool,
                    "result_count": count,
                    "message": format!(
                        "Retrieved {count} sources. Use retrieve_previous_sources to access full content."
                    ),
                })
            }
            Ok(content) if content.get("success").is_some() => json!({
                "success": false,
                "tool": tool,
                "error": content
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error"),
            }),
            _ => json!({
                "tool": tool,
                "message": "Tool called. Use retrieve_previous_sources to access full content.",
            }),
        };
        let mut truncated = message;
        truncated.content = crate::message::MessageContent::Text(summary.to_string());
        truncated
    }

    /// Append a run's new messages, merging its sources map into the stored
    /// source references.
    ///
    /// The write is read-merge-write against the primary store and is
    /// idempotent under retry only when the new messages carry stable IDs:
    /// an incoming message whose ID is already stored is skipped.
    pub async fn append_messages(
        &self,
        user_id: &str,
        course_id: &str,
        new_messages: Vec<ConversationMessage>,
        sources_map: &FxHashMap<String, SourcesEntry>,
    ) -> Result<(), StoreError> {
        let thread_id = Self::thread_id(user_id, course_id);
        let now = Utc::now();

        let existing = self.primary.load(&thread_id).await?;
        let (mut messages, created_at) = match &existing {
            Some(doc) => (doc.messages.clone(), doc.created_at),
            None => (Vec::new(), now),
        };

        // Preserve source references already stored on assistant messages,
        // then let the new map win on collision.
        let mut merged: FxHashMap<String, SourcesEntry> = FxHashMap::default();
        if let Some(doc) = &existing {
            for message in &doc.messages {
                if message.role != Role::Assistant {
                    continue;
                }
                let Some(id) = &message.id else { continue };
                if message.rag_source_ids.is_empty()
                    && message.web_source_ids.is_empty()
                    && message.image_source.is_none()
                {
                    continue;
                }
                merged.insert(
                    id.clone(),
                    SourcesEntry {
                        rag_source_ids: message.rag_source_ids.clone(),
                        web_source_ids: message.web_source_ids.clone(),
                        s3_key: message.image_source.as_ref().map(|i| i.s3_key.clone()),
                        slide_id: message.image_source.as_ref().map(|i| i.slide_id.clone()),
                        page_number: message.image_source.as_ref().map(|i| i.page_number),
                        timestamp: doc.updated_at.to_rfc3339(),
                    },
                );
            }
        }
        for (id, entry) in sources_map {
            merged.insert(id.clone(), entry.clone());
        }

        let stored_ids: std::collections::HashSet<String> = messages
            .iter()
            .filter_map(|m| m.id.clone())
            .collect();
        for message in new_messages {
            if let Some(id) = &message.id
                && stored_ids.contains(id)
            {
                continue;
            }
            messages.push(message.without_image_parts());
        }

        // Attach merged references to their assistant messages.
        for message in messages.iter_mut() {
            if message.role != Role::Assistant {
                continue;
            }
            let Some(id) = &message.id else { continue };
            if let Some(entry) = merged.get(id) {
                message.rag_source_ids = entry.rag_source_ids.clone();
                message.web_source_ids = entry.web_source_ids.clone();
                if let (Some(s3_key), Some(slide_id), Some(page_number)) =
                    (&entry.s3_key, &entry.slide_id, entry.page_number)
                {
                    message.image_source = Some(ImageSourceRef {
                        s3_key: s3_key.clone(),
                        slide_id: slide_id.clone(),
                        page_number,
                    });
                }
            }
        }

        let skip = messages.len().saturating_sub(MAX_STORED_MESSAGES);
        let messages: Vec<ConversationMessage> = messages.into_iter().skip(skip).collect();

        let document = ThreadDocument {
            thread_id: thread_id.clone(),
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            message_count: messages.len(),
            messages,
            created_at,
            updated_at: now,
        };

        // Primary first; the cache is written best-effort afterwards.
        self.primary.save(document.clone()).await?;

        let payload = CachedState {
            messages: document.messages,
        };
        match serde_json::to_string(&payload) {
            Ok(serialized) => {
                if let Err(err) = self
                    .cache
                    .set_ex(&Self::state_key(&thread_id), &serialized, self.ttl)
                    .await
                {
                    warn!(target: "lectern::history", %err, thread_id, "cache state write failed");
                }
            }
            Err(err) => warn!(target: "lectern::history", %err, "cache state serialize failed"),
        }

        let sources_key = Self::sources_key(&thread_id);
        for (id, entry) in &merged {
            match serde_json::to_string(entry) {
                Ok(serialized) => {
                    if let Err(err) = self.cache.hset(&sources_key, id, &serialized).await {
                        warn!(target: "lectern::history", %err, thread_id, "cache sources write failed");
                        break;
                    }
                }
                Err(err) => warn!(target: "lectern::history", %err, "sources serialize failed"),
            }
        }
        if let Err(err) = self.cache.expire(&sources_key, self.ttl).await {
            warn!(target: "lectern::history", %err, thread_id, "cache sources expire failed");
        }

        Ok(())
    }

    /// Full tool-message content by ID. Reads the primary store only: tool
    /// content is never truncated there.
    pub async fn get_tool_messages(
        &self,
        user_id: &str,
        course_id: &str,
        tool_message_ids: &[String],
    ) -> FxHashMap<String, ToolMessageRecord> {
        let thread_id = Self::thread_id(user_id, course_id);
        let mut records = FxHashMap::default();

        let doc = match self.primary.load(&thread_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => return records,
            Err(err) => {
                warn!(target: "lectern::history", %err, thread_id, "tool message read failed");
                return records;
            }
        };

        for message in &doc.messages {
            if message.role != Role::Tool {
                continue;
            }
            let Some(id) = &message.id else { continue };
            if !tool_message_ids.contains(id) {
                continue;
            }
            match serde_json::from_str::<Value>(&message.text()) {
                Ok(content) => {
                    records.insert(
                        id.clone(),
                        ToolMessageRecord {
                            tool_name: message.name.clone(),
                            content,
                            tool_call_id: message.tool_call_id.clone(),
                        },
                    );
                }
                Err(err) => {
                    warn!(target: "lectern::history", %err, id, "unparseable tool message content");
                }
            }
        }
        records
    }

    /// Source references for assistant messages: cache hash first, primary
    /// store on miss (warming the cache for next time).
    pub async fn get_sources_for_messages(
        &self,
        user_id: &str,
        course_id: &str,
        assistant_ids: &[String],
    ) -> FxHashMap<String, SourcesEntry> {
        let thread_id = Self::thread_id(user_id, course_id);
        let sources_key = Self::sources_key(&thread_id);

        let mut found: FxHashMap<String, SourcesEntry> = FxHashMap::default();
        let mut missing: Vec<&String> = Vec::new();
        for id in assistant_ids {
            match self.cache_hget(&sources_key, id).await {
                Some(raw) => match serde_json::from_str(&raw) {
                    Ok(entry) => {
                        found.insert(id.clone(), entry);
                    }
                    Err(err) => {
                        warn!(target: "lectern::history", %err, id, "corrupt cached sources");
                        missing.push(id);
                    }
                },
                None => missing.push(id),
            }
        }
        if missing.is_empty() {
            return found;
        }

        let doc = match self.primary.load(&thread_id).await {
            Ok(Some(doc)) => doc,
            _ => return found,
        };
        for message in &doc.messages {
            if message.role != Role::Assistant {
                continue;
            }
            let Some(id) = &message.id else { continue };
            if !missing.iter().any(|m| *m == id) {
                continue;
            }
            if message.rag_source_ids.is_empty()
                && message.web_source_ids.is_empty()
                && message.image_source.is_none()
            {
                continue;
            }
            let entry = SourcesEntry {
                rag_source_ids: message.rag_source_ids.clone(),
                web_source_ids: message.web_source_ids.clone(),
                s3_key: message.image_source.as_ref().map(|i| i.s3_key.clone()),
                slide_id: message.image_source.as_ref().map(|i| i.slide_id.clone()),
                page_number: message.image_source.as_ref().map(|i| i.page_number),
                timestamp: doc.updated_at.to_rfc3339(),
            };
            if let Ok(serialized) = serde_json::to_string(&entry)
                && let Err(err) = self.cache.hset(&sources_key, id, &serialized).await
            {
                warn!(target: "lectern::history", %err, "cache sources warm failed");
            }
            found.insert(id.clone(), entry);
        }
        found
    }

    /// Summaries of every conversation a user holds, across courses,
    /// newest first. Reads the primary store only; degrades to an empty
    /// list rather than failing the request.
    pub async fn list_conversations(&self, user_id: &str) -> Vec<ConversationSummary> {
        let documents = match self.primary.list_for_user(user_id).await {
            Ok(documents) => documents,
            Err(err) => {
                warn!(target: "lectern::history", %err, user_id, "conversation listing failed");
                return Vec::new();
            }
        };
        documents
            .into_iter()
            .map(|doc| {
                let last_message = doc
                    .messages
                    .last()
                    .filter(|m| matches!(m.role, Role::User | Role::Assistant))
                    .map(|m| preview(&m.text()))
                    .unwrap_or_default();
                ConversationSummary {
                    thread_id: doc.thread_id,
                    course_id: doc.course_id,
                    last_message,
                    message_count: doc.message_count,
                    updated_at: doc.updated_at,
                }
            })
            .collect()
    }

    /// Delete the conversation document and every related cache key.
    pub async fn clear(&self, user_id: &str, course_id: &str) -> Result<bool, StoreError> {
        let thread_id = Self::thread_id(user_id, course_id);
        let existed = self.primary.delete(&thread_id).await?;
        if let Err(err) = self.cache.delete(&Self::state_key(&thread_id)).await {
            warn!(target: "lectern::history", %err, thread_id, "cache state delete failed");
        }
        if let Err(err) = self.cache.delete(&Self::sources_key(&thread_id)).await {
            warn!(target: "lectern::history", %err, thread_id, "cache sources delete failed");
        }
        Ok(existed)
    }
}

/// Truncate text to the preview budget on a character boundary.
fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
