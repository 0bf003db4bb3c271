//! Storage seams for the vector-capable document store and the cache.
//!
//! Three traits abstract the external persistence collaborators:
//!
//! - [`ChunkStore`]: bulk unordered upsert, metadata-pre-filtered ANN
//!   search, exact-match count, and metadata-exact bulk delete over chunk
//!   documents.
//! - [`ConversationStore`]: the authoritative conversation document per
//!   thread.
//! - [`CacheStore`]: TTL'd string and hash values in front of the primary
//!   store. The cache is advisory; every reader tolerates miss, corruption,
//!   or unavailability.
//!
//! In-memory backends live in [`memory`] and are first-class citizens, not
//! test doubles.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::chunking::Chunk;
use crate::message::ConversationMessage;

/// Errors from storage backends.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Backend-level failure (connection, I/O, engine error).
    #[error("store backend error: {message}")]
    #[diagnostic(code(lectern::stores::backend))]
    Backend { message: String },

    /// A stored payload failed to (de)serialize.
    #[error(transparent)]
    #[diagnostic(code(lectern::stores::serde))]
    Serde(#[from] serde_json::Error),

    /// A call exceeded its deadline.
    #[error("store call timed out after {millis}ms")]
    #[diagnostic(code(lectern::stores::timeout))]
    Timeout { millis: u64 },
}

/// Metadata predicate applied by the store *before* vector similarity.
///
/// `course_id` is always required; empty slide / chunk-index lists mean
/// "no constraint on that field". Matching is set-exact.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkFilter {
    pub course_id: String,
    pub slide_ids: Vec<String>,
    pub chunk_indices: Vec<usize>,
}

impl ChunkFilter {
    #[must_use]
    pub fn for_course(course_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            ..Default::default()
        }
    }

    /// True when `chunk` satisfies every constraint.
    #[must_use]
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if chunk.course_id != self.course_id {
            return false;
        }
        if !self.slide_ids.is_empty() && !self.slide_ids.contains(&chunk.slide_id) {
            return false;
        }
        if !self.chunk_indices.is_empty() && !self.chunk_indices.contains(&chunk.chunk_index) {
            return false;
        }
        true
    }
}

/// One ANN hit: document key, chunk metadata (embedding stripped), and the
/// engine-assigned similarity score.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub metadata: Chunk,
    pub score: f32,
}

/// Outcome of one unordered bulk upsert.
#[derive(Clone, Debug, Default)]
pub struct UpsertOutcome {
    pub inserted: usize,
    /// Documents skipped because their key already existed.
    pub duplicates: usize,
}

/// Vector-capable chunk document store.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert `chunks` keyed by their stable IDs with unordered semantics:
    /// a duplicate key never aborts the batch, it is merely counted.
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<UpsertOutcome, StoreError>;

    /// Approximate-nearest-neighbor search over embeddings with `filter`
    /// applied before similarity. `num_candidates` bounds the ANN working
    /// set; at most `limit` hits return, scores non-increasing.
    async fn search(
        &self,
        query: &[f32],
        filter: &ChunkFilter,
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError>;

    /// Count documents matching the exact source triple.
    async fn count_by_source(
        &self,
        course_id: &str,
        slide_id: &str,
        s3_file_name: &str,
    ) -> Result<u64, StoreError>;

    /// Delete documents matching the exact source triple; returns the
    /// deleted count (zero matches is success).
    async fn delete_by_source(
        &self,
        course_id: &str,
        slide_id: &str,
        s3_file_name: &str,
    ) -> Result<u64, StoreError>;
}

/// The conversation document stored per thread.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadDocument {
    pub thread_id: String,
    pub user_id: String,
    pub course_id: String,
    pub messages: Vec<ConversationMessage>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authoritative conversation persistence keyed by thread id.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadDocument>, StoreError>;

    /// Upsert the full document (read-merge-write happens in the caller).
    async fn save(&self, document: ThreadDocument) -> Result<(), StoreError>;

    /// Delete the document; returns whether it existed.
    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError>;

    /// Every document belonging to `user_id`, newest `updated_at` first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ThreadDocument>, StoreError>;
}

/// TTL'd cache in front of the primary store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hgetall(&self, key: &str) -> Result<FxHashMap<String, String>, StoreError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}
