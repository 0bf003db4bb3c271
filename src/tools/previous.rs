//! Re-materialization of truncated tool content.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::{RETRIEVE_PREVIOUS_SOURCES, Tool, ToolDefinition, failure};
use crate::history::StateManager;

/// `retrieve_previous_sources`: the only path through which the model can
/// read earlier tool results in full. History shows tool messages
/// truncated; this tool reads the untruncated content from the primary
/// store by tool-message ID.
pub struct RetrievePreviousSourcesTool {
    state: Arc<StateManager>,
    user_id: String,
    course_id: String,
}

impl RetrievePreviousSourcesTool {
    #[must_use]
    pub fn new(
        state: Arc<StateManager>,
        user_id: impl Into<String>,
        course_id: impl Into<String>,
    ) -> Self {
        Self {
            state,
            user_id: user_id.into(),
            course_id: course_id.into(),
        }
    }
}

#[async_trait]
impl Tool for RetrievePreviousSourcesTool {
    fn name(&self) -> &'static str {
        RETRIEVE_PREVIOUS_SOURCES
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: RETRIEVE_PREVIOUS_SOURCES.to_string(),
            description: "Retrieve the full content of earlier tool results by their tool \
                          message IDs."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "tool_message_ids": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "IDs of the tool messages to re-read."
                    }
                },
                "required": ["tool_message_ids"]
            }),
        }
    }

    async fn call(&self, args: Value) -> Value {
        let Some(ids) = args.get("tool_message_ids").and_then(Value::as_array) else {
            return failure("retrieve_previous_sources requires 'tool_message_ids'");
        };
        let ids: Vec<String> = ids
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();

        info!(
            target: "lectern::tools",
            requested = ids.len(),
            "retrieve_previous_sources"
        );

        let records = self
            .state
            .get_tool_messages(&self.user_id, &self.course_id, &ids)
            .await;

        let mut results: Vec<Value> = Vec::new();
        let mut found = 0usize;
        for id in &ids {
            let Some(record) = records.get(id) else {
                continue;
            };
            found += 1;
            if let Some(items) = record.content.get("results").and_then(Value::as_array) {
                for item in items {
                    let mut annotated = item.clone();
                    if let Some(obj) = annotated.as_object_mut() {
                        obj.insert(
                            "from_tool_message".to_string(),
                            Value::String(id.clone()),
                        );
                    }
                    results.push(annotated);
                }
            }
        }

        json!({
            "success": true,
            "results": results,
            "tool_message_count": found,
        })
    }
}
