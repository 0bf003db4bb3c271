//! In-memory storage backends.
//!
//! Process-local implementations of the storage seams: exact cosine scoring
//! stands in for the ANN index (the filter/candidate-pool contract is
//! identical), and the cache honors TTLs against a monotonic clock. Useful
//! for single-node deployments, tests, and local development.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

use super::{
    CacheStore, ChunkFilter, ChunkStore, ConversationStore, RetrievedChunk, StoreError,
    ThreadDocument, UpsertOutcome,
};
use crate::chunking::Chunk;

/// In-memory chunk store with exact cosine similarity search.
#[derive(Default)]
pub struct MemoryChunkStore {
    inner: RwLock<FxHashMap<String, Chunk>>,
}

impl MemoryChunkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<UpsertOutcome, StoreError> {
        let mut outcome = UpsertOutcome::default();
        let mut map = self.inner.write();
        for chunk in chunks {
            if map.contains_key(&chunk.id) {
                outcome.duplicates += 1;
            } else {
                map.insert(chunk.id.clone(), chunk.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn search(
        &self,
        query: &[f32],
        filter: &ChunkFilter,
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        let map = self.inner.read();
        let mut candidates: Vec<&Chunk> = map
            .values()
            .filter(|c| filter.matches(c) && c.embedding.is_some())
            .collect();
        // Deterministic candidate order before the pool cut.
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        candidates.truncate(num_candidates);

        let mut hits: Vec<RetrievedChunk> = candidates
            .into_iter()
            .map(|c| RetrievedChunk {
                id: c.id.clone(),
                score: cosine(query, c.embedding.as_deref().unwrap_or_default()),
                metadata: c.without_embedding(),
            })
            .collect();
        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count_by_source(
        &self,
        course_id: &str,
        slide_id: &str,
        s3_file_name: &str,
    ) -> Result<u64, StoreError> {
        let map = self.inner.read();
        Ok(map
            .values()
            .filter(|c| {
                c.course_id == course_id
                    && c.slide_id == slide_id
                    && c.s3_file_name == s3_file_name
            })
            .count() as u64)
    }

    async fn delete_by_source(
        &self,
        course_id: &str,
        slide_id: &str,
        s3_file_name: &str,
    ) -> Result<u64, StoreError> {
        let mut map = self.inner.write();
        let before = map.len();
        map.retain(|_, c| {
            !(c.course_id == course_id
                && c.slide_id == slide_id
                && c.s3_file_name == s3_file_name)
        });
        Ok((before - map.len()) as u64)
    }
}

/// In-memory conversation store.
#[derive(Default)]
pub struct MemoryConversationStore {
    inner: RwLock<FxHashMap<String, ThreadDocument>>,
}

impl MemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadDocument>, StoreError> {
        Ok(self.inner.read().get(thread_id).cloned())
    }

    async fn save(&self, document: ThreadDocument) -> Result<(), StoreError> {
        self.inner
            .write()
            .insert(document.thread_id.clone(), document);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().remove(thread_id).is_some())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ThreadDocument>, StoreError> {
        let mut documents: Vec<ThreadDocument> = self
            .inner
            .read()
            .values()
            .filter(|doc| doc.user_id == user_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(documents)
    }
}

enum CacheValue {
    Str(String),
    Hash(FxHashMap<String, String>),
}

struct CacheEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory TTL cache with string and hash values.
#[derive(Default)]
pub struct MemoryCache {
    inner: RwLock<FxHashMap<String, CacheEntry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn purge(map: &mut FxHashMap<String, CacheEntry>, key: &str) {
        if map.get(key).is_some_and(CacheEntry::expired) {
            map.remove(key);
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut map = self.inner.write();
        Self::purge(&mut map, key);
        Ok(match map.get(key).map(|e| &e.value) {
            Some(CacheValue::Str(s)) => Some(s.clone()),
            _ => None,
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner.write().insert(
            key.to_string(),
            CacheEntry {
                value: CacheValue::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.write().remove(key);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut map = self.inner.write();
        Self::purge(&mut map, key);
        Ok(match map.get(key).map(|e| &e.value) {
            Some(CacheValue::Hash(h)) => h.get(field).cloned(),
            _ => None,
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.inner.write();
        Self::purge(&mut map, key);
        let entry = map.entry(key.to_string()).or_insert_with(|| CacheEntry {
            value: CacheValue::Hash(FxHashMap::default()),
            expires_at: None,
        });
        match &mut entry.value {
            CacheValue::Hash(h) => {
                h.insert(field.to_string(), value.to_string());
            }
            CacheValue::Str(_) => {
                entry.value = CacheValue::Hash(FxHashMap::from_iter([(
                    field.to_string(),
                    value.to_string(),
                )]));
            }
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<FxHashMap<String, String>, StoreError> {
        let mut map = self.inner.write();
        Self::purge(&mut map, key);
        Ok(match map.get(key).map(|e| &e.value) {
            Some(CacheValue::Hash(h)) => h.clone(),
            _ => FxHashMap::default(),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(entry) = self.inner.write().get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}
