//! Embedding provider seam and HTTP client.
//!
//! Document and query texts embed through the same provider with an
//! explicit input type; the output dimension is fixed per deployment and
//! passed on every call so the store schema and the provider can never
//! drift apart.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

/// Default output dimension for chunk and query embeddings.
pub const DEFAULT_DIMENSION: usize = 512;

/// Whether a text embeds as stored content or as a search query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Document => "document",
            InputType::Query => "query",
        }
    }
}

/// Errors from the embedding provider.
#[derive(Debug, Error, Diagnostic)]
pub enum EmbeddingError {
    /// Network-level failure; retryable.
    #[error("embedding transport error: {0}")]
    #[diagnostic(code(lectern::embeddings::transport))]
    Transport(String),

    /// Provider rejected the credential; fatal.
    #[error("embedding provider rejected credentials (status {status})")]
    #[diagnostic(
        code(lectern::embeddings::auth),
        help("Check EMBEDDING_API_KEY; auth failures are never retried.")
    )]
    Auth { status: u16 },

    /// Provider rejected the request shape; fatal.
    #[error("embedding provider rejected the request (status {status}): {message}")]
    #[diagnostic(code(lectern::embeddings::bad_request))]
    BadRequest { status: u16, message: String },

    /// Rate limiting or server-side failure; retryable.
    #[error("embedding provider unavailable (status {status})")]
    #[diagnostic(code(lectern::embeddings::unavailable))]
    Unavailable { status: u16 },

    /// The provider answered with a payload we cannot use.
    #[error("malformed embedding response: {0}")]
    #[diagnostic(code(lectern::embeddings::malformed))]
    Malformed(String),
}

impl EmbeddingError {
    /// True for errors worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Transport(_) | EmbeddingError::Unavailable { .. }
        )
    }
}

/// Embedding provider seam.
///
/// Requests are idempotent; callers own batching and retry policy.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed `texts` into vectors of exactly `dim` components.
    async fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
        dim: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// HTTP client for a Voyage-style embeddings endpoint.
#[derive(Clone)]
pub struct VoyageEmbeddings {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

impl VoyageEmbeddings {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.voyageai.com/v1";

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
        }
    }
}

#[async_trait]
impl EmbeddingClient for VoyageEmbeddings {
    #[instrument(skip_all, fields(texts = texts.len(), input_type = input_type.as_str()))]
    async fn embed(
        &self,
        texts: &[String],
        input_type: InputType,
        dim: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "input": texts,
                "model": self.model,
                "input_type": input_type.as_str(),
                "output_dimension": dim,
            }))
            .send()
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(match code {
                401 | 403 => EmbeddingError::Auth { status: code },
                400 | 404 | 422 => EmbeddingError::BadRequest {
                    status: code,
                    message: body,
                },
                _ => EmbeddingError::Unavailable { status: code },
            });
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut vectors = vec![Vec::new(); texts.len()];
        for entry in parsed.data {
            if entry.embedding.len() != dim {
                return Err(EmbeddingError::Malformed(format!(
                    "embedding at index {} has dimension {}, expected {dim}",
                    entry.index,
                    entry.embedding.len()
                )));
            }
            let slot = vectors
                .get_mut(entry.index)
                .ok_or_else(|| EmbeddingError::Malformed("index out of range".to_string()))?;
            *slot = entry.embedding;
        }
        Ok(vectors)
    }
}
