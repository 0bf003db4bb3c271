//! Vector retrieval with metadata pre-filtering.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::embeddings::{EmbeddingClient, EmbeddingError, InputType};
use crate::stores::{ChunkFilter, ChunkStore, RetrievedChunk, StoreError};

/// Errors from the retrieval path.
#[derive(Debug, Error, Diagnostic)]
pub enum RetrievalError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Query embedding plus pre-filtered ANN search.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn ChunkStore>,
    dim: usize,
    num_candidates: usize,
}

impl Retriever {
    #[must_use]
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn ChunkStore>,
        dim: usize,
        num_candidates: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            dim,
            num_candidates,
        }
    }

    /// Top-`limit` chunks for `query_text`, constrained to `course_id` and,
    /// when the lists are non-empty, to the given slides / chunk indices.
    ///
    /// The filter is applied by the store before similarity; results come
    /// back ordered by non-increasing score with embeddings stripped.
    #[instrument(skip_all, fields(course_id, limit))]
    pub async fn retrieve(
        &self,
        course_id: &str,
        slides: &[String],
        chunk_indices: &[usize],
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let embedded = self
            .embedder
            .embed(&[query_text.to_string()], InputType::Query, self.dim)
            .await?;
        let query = embedded.into_iter().next().unwrap_or_default();

        let filter = ChunkFilter {
            course_id: course_id.to_string(),
            slide_ids: slides.to_vec(),
            chunk_indices: chunk_indices.to_vec(),
        };
        let hits = self
            .store
            .search(&query, &filter, self.num_candidates, limit)
            .await?;
        debug!(
            target: "lectern::retrieval",
            hits = hits.len(),
            course_id,
            "retrieval complete"
        );
        Ok(hits)
    }
}
