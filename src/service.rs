//! The operation surface: ingest (inbound), ask (outbound), delete
//! (management), plus conversation read/clear.
//!
//! This is the boundary a transport layer calls. Operations return
//! report/response envelopes rather than bare errors so a handler can
//! serialize them directly; input validation failures (unknown search
//! type, malformed request) are the caller's to reject via the strict
//! parsers on the request types.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::agent::{
    AgentGraph, AgentState, ImageSource, RagSource, SearchType, Snapshot, WebSource,
};
use crate::chunking;
use crate::config::Settings;
use crate::embeddings::EmbeddingClient;
use crate::history::{ConversationSummary, DEFAULT_HISTORY_LIMIT, StateManager};
use crate::ingestion::IngestionPipeline;
use crate::message::ConversationMessage;
use crate::providers::{ChatModel, ObjectStore, WebSearchClient};
use crate::retrieval::Retriever;
use crate::stores::{CacheStore, ChunkStore, ConversationStore, StoreError};
use crate::tools::{RagSearchTool, RetrievePreviousSourcesTool, Tool, WebSearchTool};

/// Validity window for presigned snapshot URLs.
const SNAPSHOT_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// External collaborators the service composes.
pub struct ServiceDeps {
    pub objects: Arc<dyn ObjectStore>,
    pub chunk_store: Arc<dyn ChunkStore>,
    pub conversation_store: Arc<dyn ConversationStore>,
    pub cache: Arc<dyn CacheStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub chat: Arc<dyn ChatModel>,
    pub web_search: Arc<dyn WebSearchClient>,
}

/// Tunables resolved from [`Settings`] (or set directly in tests).
#[derive(Clone, Debug)]
pub struct ServiceOptions {
    pub bucket: String,
    pub embedding_dim: usize,
    pub num_candidates: usize,
    pub max_words: usize,
}

impl ServiceOptions {
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            embedding_dim: crate::embeddings::DEFAULT_DIMENSION,
            num_candidates: Settings::DEFAULT_NUM_CANDIDATES,
            max_words: chunking::DEFAULT_MAX_WORDS,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            bucket: settings.s3_bucket.clone(),
            embedding_dim: settings.embedding_dim,
            num_candidates: settings.num_candidates,
            max_words: chunking::DEFAULT_MAX_WORDS,
        }
    }
}

// ---------------------------------------------------------------------------
// Request / report envelopes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct IngestRequest {
    pub course_id: String,
    pub slide_id: String,
    pub s3_file_name: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct IngestStatistics {
    pub total_pages: u32,
    pub chunks_created: usize,
    pub chunks_saved: usize,
    pub duplicates_skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct IngestTiming {
    pub download_ms: u64,
    pub chunking_ms: u64,
    pub embedding_ms: u64,
    pub save_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct IngestReport {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub statistics: IngestStatistics,
    pub timing: IngestTiming,
    pub processing_time_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SnapshotRequest {
    pub slide_id: String,
    pub page_number: u32,
    pub s3_key: String,
}

#[derive(Clone, Debug)]
pub struct AskRequest {
    pub user_id: String,
    pub course_id: String,
    pub user_prompt: String,
    pub snapshot: Option<SnapshotRequest>,
    pub slide_priority: Vec<String>,
    pub search_type: SearchType,
}

#[derive(Clone, Debug, Serialize)]
pub struct AskResponse {
    pub response: String,
    #[serde(rename = "ragSources")]
    pub rag_sources: Vec<RagSource>,
    #[serde(rename = "webSources")]
    pub web_sources: Vec<WebSource>,
    #[serde(rename = "imageSources")]
    pub image_sources: Vec<ImageSource>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeleteRequest {
    pub course_id: String,
    pub slide_id: String,
    pub s3_file_name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeleteReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub vectors_deleted: u64,
    pub processing_time_ms: u64,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Composition root for the three operations.
pub struct LecternService {
    objects: Arc<dyn ObjectStore>,
    chunk_store: Arc<dyn ChunkStore>,
    chat: Arc<dyn ChatModel>,
    web_search: Arc<dyn WebSearchClient>,
    state: Arc<StateManager>,
    retriever: Arc<Retriever>,
    pipeline: IngestionPipeline,
    options: ServiceOptions,
}

impl LecternService {
    #[must_use]
    pub fn new(deps: ServiceDeps, options: ServiceOptions) -> Self {
        let retriever = Arc::new(Retriever::new(
            Arc::clone(&deps.embedder),
            Arc::clone(&deps.chunk_store),
            options.embedding_dim,
            options.num_candidates,
        ));
        let pipeline = IngestionPipeline::new(
            Arc::clone(&deps.embedder),
            Arc::clone(&deps.chunk_store),
            options.embedding_dim,
        );
        let state = Arc::new(StateManager::new(
            Arc::clone(&deps.conversation_store),
            Arc::clone(&deps.cache),
        ));
        Self {
            objects: deps.objects,
            chunk_store: deps.chunk_store,
            chat: deps.chat,
            web_search: deps.web_search,
            state,
            retriever,
            pipeline,
            options,
        }
    }

    /// Shared state manager (tools and tests reach through this).
    #[must_use]
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }

    /// Inbound: fetch a PDF from object storage, chunk it, embed and
    /// persist the chunks.
    #[instrument(skip(self), fields(course_id = %request.course_id, slide_id = %request.slide_id))]
    pub async fn ingest(&self, request: IngestRequest) -> IngestReport {
        let started = Instant::now();
        let mut statistics = IngestStatistics::default();
        let mut timing = IngestTiming::default();

        let download_started = Instant::now();
        let bytes = match self
            .objects
            .get(&self.options.bucket, &request.s3_file_name)
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(target: "lectern::service", %err, "object download failed");
                return Self::ingest_failure(err.to_string(), statistics, timing, started);
            }
        };
        timing.download_ms = download_started.elapsed().as_millis() as u64;

        let chunking_started = Instant::now();
        let IngestRequest {
            course_id,
            slide_id,
            s3_file_name,
        } = request;
        let max_words = self.options.max_words;
        let chunked = tokio::task::spawn_blocking(move || {
            chunking::chunk_pdf(&bytes, &course_id, &slide_id, &s3_file_name, max_words)
        })
        .await;
        let chunks = match chunked {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(err)) => {
                error!(target: "lectern::service", %err, "chunking failed");
                return Self::ingest_failure(err.to_string(), statistics, timing, started);
            }
            Err(err) => {
                error!(target: "lectern::service", %err, "chunking task panicked");
                return Self::ingest_failure(err.to_string(), statistics, timing, started);
            }
        };
        timing.chunking_ms = chunking_started.elapsed().as_millis() as u64;
        statistics.chunks_created = chunks.len();
        statistics.total_pages = chunks.first().map_or(0, |c| c.total_pages);

        match self.pipeline.embed_and_save(chunks).await {
            Ok(report) => {
                statistics.chunks_saved = report.inserted;
                statistics.duplicates_skipped = report.duplicates;
                statistics.errors = report
                    .errors
                    .iter()
                    .map(|e| {
                        format!(
                            "batch {}..{}: {}",
                            e.batch_start, e.batch_end, e.message
                        )
                    })
                    .collect();
                timing.embedding_ms = report.embedding_ms;
                timing.save_ms = report.save_ms;
                info!(
                    target: "lectern::service",
                    chunks_saved = statistics.chunks_saved,
                    duplicates = statistics.duplicates_skipped,
                    "ingestion complete"
                );
                IngestReport {
                    status: "success".to_string(),
                    error: None,
                    statistics,
                    timing,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(err) => {
                error!(target: "lectern::service", %err, "embedding stage failed");
                Self::ingest_failure(err.to_string(), statistics, timing, started)
            }
        }
    }

    fn ingest_failure(
        error: String,
        statistics: IngestStatistics,
        timing: IngestTiming,
        started: Instant,
    ) -> IngestReport {
        IngestReport {
            status: "error".to_string(),
            error: Some(error),
            statistics,
            timing,
            processing_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Outbound: answer a question through the agent graph and persist the
    /// turn.
    #[instrument(skip(self), fields(user_id = %request.user_id, course_id = %request.course_id))]
    pub async fn ask(&self, request: AskRequest) -> AskResponse {
        let snapshot = match &request.snapshot {
            Some(snap) => {
                let presigned_url = match self
                    .objects
                    .presign(&self.options.bucket, &snap.s3_key, SNAPSHOT_URL_TTL)
                    .await
                {
                    Ok(url) => Some(url),
                    Err(err) => {
                        warn!(
                            target: "lectern::service",
                            %err,
                            "snapshot presign failed; continuing without image"
                        );
                        None
                    }
                };
                Some(Snapshot {
                    slide_id: snap.slide_id.clone(),
                    page_number: snap.page_number,
                    s3_key: snap.s3_key.clone(),
                    presigned_url,
                })
            }
            None => None,
        };

        let history = self
            .state
            .get_conversation_history(&request.user_id, &request.course_id, DEFAULT_HISTORY_LIMIT)
            .await;

        let mut user_message = match snapshot.as_ref().and_then(|s| s.presigned_url.clone()) {
            Some(url) => ConversationMessage::user_with_image(&request.user_prompt, url),
            None => ConversationMessage::user(&request.user_prompt),
        };
        user_message.id = Some(Uuid::new_v4().to_string());

        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(RagSearchTool::new(
                Arc::clone(&self.retriever),
                request.course_id.clone(),
                request.slide_priority.clone(),
            )),
            Arc::new(WebSearchTool::new(Arc::clone(&self.web_search))),
            Arc::new(RetrievePreviousSourcesTool::new(
                Arc::clone(&self.state),
                request.user_id.clone(),
                request.course_id.clone(),
            )),
        ];

        let state = AgentState::new(
            history,
            user_message,
            request.course_id.clone(),
            request.user_id.clone(),
            request.slide_priority.clone(),
            request.search_type,
            snapshot,
        );
        let graph = AgentGraph::new(Arc::clone(&self.chat), tools);
        let outcome = graph.run(state).await;

        if let Err(err) = self
            .state
            .append_messages(
                &request.user_id,
                &request.course_id,
                outcome.new_messages.clone(),
                &outcome.sources_map,
            )
            .await
        {
            error!(target: "lectern::service", %err, "conversation persistence failed");
        }

        AskResponse {
            response: outcome.response,
            rag_sources: outcome.rag_sources,
            web_sources: outcome.web_sources,
            image_sources: outcome.image_sources,
        }
    }

    /// Management: delete every chunk matching the exact source triple.
    #[instrument(skip(self), fields(course_id = %request.course_id, slide_id = %request.slide_id))]
    pub async fn delete(&self, request: DeleteRequest) -> DeleteReport {
        let started = Instant::now();

        let matching = match self
            .chunk_store
            .count_by_source(
                &request.course_id,
                &request.slide_id,
                &request.s3_file_name,
            )
            .await
        {
            Ok(count) => count,
            Err(err) => {
                error!(target: "lectern::service", %err, "count failed");
                return DeleteReport {
                    success: false,
                    error: Some(err.to_string()),
                    vectors_deleted: 0,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                };
            }
        };
        if matching == 0 {
            return DeleteReport {
                success: true,
                error: None,
                vectors_deleted: 0,
                processing_time_ms: started.elapsed().as_millis() as u64,
            };
        }

        match self
            .chunk_store
            .delete_by_source(
                &request.course_id,
                &request.slide_id,
                &request.s3_file_name,
            )
            .await
        {
            Ok(deleted) => {
                info!(target: "lectern::service", deleted, "vectors deleted");
                DeleteReport {
                    success: true,
                    error: None,
                    vectors_deleted: deleted,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(err) => {
                error!(target: "lectern::service", %err, "delete failed");
                DeleteReport {
                    success: false,
                    error: Some(err.to_string()),
                    vectors_deleted: 0,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }

    /// Read a conversation as the agent would see it (tool content
    /// truncated).
    pub async fn conversation_history(
        &self,
        user_id: &str,
        course_id: &str,
        limit: usize,
    ) -> Vec<ConversationMessage> {
        self.state
            .get_conversation_history(user_id, course_id, limit)
            .await
    }

    /// Every conversation a user holds, across courses, newest first.
    pub async fn list_conversations(&self, user_id: &str) -> Vec<ConversationSummary> {
        self.state.list_conversations(user_id).await
    }

    /// Drop a conversation and its cached state.
    pub async fn clear_conversation(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<bool, StoreError> {
        self.state.clear(user_id, course_id).await
    }
}
