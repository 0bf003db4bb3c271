//! Web search tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::{Tool, ToolDefinition, WEB_SEARCH, failure};
use crate::providers::WebSearchClient;

/// Default result budget per call.
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// `web_search`: current information from the external search collaborator.
///
/// Result IDs are temporary ("1".."n" per call); the tool-dispatch node
/// renumbers them into the run-global sequence.
pub struct WebSearchTool {
    client: Arc<dyn WebSearchClient>,
}

impl WebSearchTool {
    #[must_use]
    pub fn new(client: Arc<dyn WebSearchClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        WEB_SEARCH
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: WEB_SEARCH.to_string(),
            description: "Search the web for current information.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The search query." },
                    "max_results": {
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
            return failure("web_search requires a 'query' argument");
        };
        let max_results = args
            .get("max_results")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_MAX_RESULTS, |n| n as usize);

        info!(target: "lectern::tools", query, max_results, "web_search");

        match self.client.search(query, max_results).await {
            Ok(results) => {
                let results: Vec<Value> = results
                    .iter()
                    .enumerate()
                    .map(|(i, hit)| {
                        json!({
                            "id": (i + 1).to_string(),
                            "title": hit.title,
                            "url": hit.url,
                            "text": hit.content,
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
