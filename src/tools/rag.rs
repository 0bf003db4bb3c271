//! Course-material search tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::{RAG_SEARCH, Tool, ToolDefinition, failure};
use crate::retrieval::Retriever;

/// Default result budget per call.
pub const DEFAULT_LIMIT: usize = 10;

/// `rag_search`: vector retrieval over the course chunks, bound to the
/// request's course and slide priority.
///
/// Result IDs are temporary ("1".."n" per call); the tool-dispatch node
/// renumbers them into the run-global sequence.
pub struct RagSearchTool {
    retriever: Arc<Retriever>,
    course_id: String,
    slides_priority: Vec<String>,
}

impl RagSearchTool {
    #[must_use]
    pub fn new(
        retriever: Arc<Retriever>,
        course_id: impl Into<String>,
        slides_priority: Vec<String>,
    ) -> Self {
        Self {
            retriever,
            course_id: course_id.into(),
            slides_priority,
        }
    }
}

#[async_trait]
impl Tool for RagSearchTool {
    fn name(&self) -> &'static str {
        RAG_SEARCH
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: RAG_SEARCH.to_string(),
            description: "Search the course materials for passages relevant to a query."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query optimized for vector similarity."
                    },
                    "course_id": {
                        "type": "string",
                        "description": "Course to search; defaults to the current course."
                    },
                    "slides_priority": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Slide IDs to restrict the search to."
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Value {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return failure("rag_search requires a 'query' argument");
        };
        let course_id = args
            .get("course_id")
            .and_then(Value::as_str)
            .unwrap_or(&self.course_id);
        let slides: Vec<String> = args
            .get("slides_priority")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| self.slides_priority.clone());
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_LIMIT, |n| n as usize);

        info!(
            target: "lectern::tools",
            course_id,
            query,
            limit,
            "rag_search"
        );

        match self
            .retriever
            .retrieve(course_id, &slides, &[], query, limit)
            .await
        {
            Ok(hits) => {
                let results: Vec<Value> = hits
                    .iter()
                    .enumerate()
                    .map(|(i, hit)| {
                        json!({
                            "id": (i + 1).to_string(),
                            "slide": hit.metadata.slide_id,
                            "s3file": hit.metadata.s3_file_name,
                            "start": hit.metadata.page_start.to_string(),
                            "end": hit.metadata.page_end.to_string(),
                            "text": hit.metadata.text,
                            "score": hit.score,
                        })
                    })
                    .collect();
                json!({
                    "success": true,
                    "results": results,
                    "count": results.len(),
                })
            }
            Err(err) => failure(err),
        }
    }
}
