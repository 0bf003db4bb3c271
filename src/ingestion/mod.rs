//! Embedding + upsert stage of the ingestion pipeline.
//!
//! Chunks embed in batches (the batch is the retry unit) and persist with
//! unordered bulk upserts, several batches in flight for each stage. A
//! batch that fails after bounded retries is recorded and skipped; it never
//! rolls back earlier batches — chunks are re-computable and upserts are
//! idempotent by stable ID.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{info, instrument, warn};

use crate::chunking::Chunk;
use crate::embeddings::{EmbeddingClient, EmbeddingError, InputType};
use crate::retry;
use crate::stores::ChunkStore;

/// Maximum texts per embedding call.
pub const EMBED_BATCH_SIZE: usize = 1000;
/// Maximum documents per bulk upsert.
pub const UPSERT_BATCH_SIZE: usize = 100;
/// In-flight batch budget for each stage.
pub const MAX_IN_FLIGHT: usize = 6;

/// A batch-scoped failure recorded in the report.
#[derive(Clone, Debug)]
pub struct BatchError {
    pub batch_start: usize,
    pub batch_end: usize,
    pub message: String,
}

/// Outcome of [`IngestionPipeline::embed_and_save`].
#[derive(Clone, Debug, Default)]
pub struct SaveReport {
    /// Chunks that received embeddings.
    pub embedded: usize,
    /// Documents newly inserted.
    pub inserted: usize,
    /// Documents skipped on duplicate key.
    pub duplicates: usize,
    /// Batch-level failures (embedding or upsert).
    pub errors: Vec<BatchError>,
    /// Wall-clock time spent in the embedding stage.
    pub embedding_ms: u64,
    /// Wall-clock time spent in the upsert stage.
    pub save_ms: u64,
}

/// Batched embed-then-upsert over a chunk sequence.
pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn ChunkStore>,
    dim: usize,
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(embedder: Arc<dyn EmbeddingClient>, store: Arc<dyn ChunkStore>, dim: usize) -> Self {
        Self {
            embedder,
            store,
            dim,
        }
    }

    /// Embed every chunk and persist the results.
    ///
    /// Transient provider failures retry per batch; exhausted batches are
    /// reported in `errors` and their chunks skipped. Fatal provider errors
    /// (auth, bad request) abort immediately.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn embed_and_save(&self, mut chunks: Vec<Chunk>) -> Result<SaveReport, EmbeddingError> {
        let mut report = SaveReport::default();
        if chunks.is_empty() {
            return Ok(report);
        }

        // Stage 1: embedding, batch = retry unit, bounded in-flight.
        let embed_started = std::time::Instant::now();
        let batches: Vec<(usize, Vec<String>)> = chunks
            .chunks(EMBED_BATCH_SIZE)
            .enumerate()
            .map(|(i, batch)| {
                (
                    i * EMBED_BATCH_SIZE,
                    batch.iter().map(|c| c.text.clone()).collect(),
                )
            })
            .collect();

        let embed_results: Vec<(usize, usize, Result<Vec<Vec<f32>>, EmbeddingError>)> =
            stream::iter(batches)
                .map(|(start, texts)| {
                    let embedder = Arc::clone(&self.embedder);
                    let dim = self.dim;
                    async move {
                        let len = texts.len();
                        let result = retry::with_backoff(
                            "embedding batch",
                            retry::MAX_ATTEMPTS,
                            retry::BASE_DELAY,
                            EmbeddingError::is_transient,
                            || embedder.embed(&texts, InputType::Document, dim),
                        )
                        .await;
                        (start, len, result)
                    }
                })
                .buffer_unordered(MAX_IN_FLIGHT)
                .collect()
                .await;

        for (start, len, result) in embed_results {
            match result {
                Ok(vectors) => {
                    for (offset, vector) in vectors.into_iter().enumerate() {
                        if let Some(chunk) = chunks.get_mut(start + offset) {
                            chunk.embedding = Some(vector);
                        }
                    }
                    report.embedded += len;
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        target: "lectern::ingestion",
                        batch_start = start,
                        %err,
                        "embedding batch exhausted retries; skipping"
                    );
                    report.errors.push(BatchError {
                        batch_start: start,
                        batch_end: start + len,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        report.embedding_ms = embed_started.elapsed().as_millis() as u64;

        // Stage 2: unordered bulk upserts, bounded in-flight.
        let save_started = std::time::Instant::now();
        let embedded: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| c.embedding.is_some())
            .collect();
        let upsert_batches: Vec<(usize, Vec<Chunk>)> = embedded
            .chunks(UPSERT_BATCH_SIZE)
            .enumerate()
            .map(|(i, batch)| (i * UPSERT_BATCH_SIZE, batch.to_vec()))
            .collect();

        let upsert_results: Vec<(usize, usize, Result<crate::stores::UpsertOutcome, _>)> =
            stream::iter(upsert_batches)
                .map(|(start, batch)| {
                    let store = Arc::clone(&self.store);
                    async move {
                        let len = batch.len();
                        let result = store.upsert_chunks(&batch).await;
                        (start, len, result)
                    }
                })
                .buffer_unordered(MAX_IN_FLIGHT)
                .collect()
                .await;

        for (start, len, result) in upsert_results {
            match result {
                Ok(outcome) => {
                    report.inserted += outcome.inserted;
                    report.duplicates += outcome.duplicates;
                }
                Err(err) => {
                    warn!(
                        target: "lectern::ingestion",
                        batch_start = start,
                        %err,
                        "upsert batch failed; continuing with remaining batches"
                    );
                    report.errors.push(BatchError {
                        batch_start: start,
                        batch_end: start + len,
                        message: err.to_string(),
                    });
                }
            }
        }

        report.save_ms = save_started.elapsed().as_millis() as u64;

        info!(
            target: "lectern::ingestion",
            embedded = report.embedded,
            inserted = report.inserted,
            duplicates = report.duplicates,
            errors = report.errors.len(),
            "embed_and_save complete"
        );
        Ok(report)
    }
}
