//! Agent tool contracts.
//!
//! Tools never raise: every call returns a JSON envelope with a boolean
//! `success`, and failures surface as `{success: false, error, results: []}`
//! packets the model can see and react to.

pub mod previous;
pub mod rag;
pub mod web;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agent::SearchType;

pub use previous::RetrievePreviousSourcesTool;
pub use rag::RagSearchTool;
pub use web::WebSearchTool;

/// Tool name constants.
pub const RAG_SEARCH: &str = "rag_search";
pub const WEB_SEARCH: &str = "web_search";
pub const RETRIEVE_PREVIOUS_SOURCES: &str = "retrieve_previous_sources";

/// Declaration handed to the chat model for tool binding.
#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the arguments.
    pub parameters: Value,
}

/// An executable agent tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn definition(&self) -> ToolDefinition;

    /// Execute with the model-provided arguments. Must not fail: errors are
    /// reported inside the returned envelope.
    async fn call(&self, args: Value) -> Value;
}

/// Tool names bound for a search type. `retrieve_previous_sources` is
/// always available; the search tools are gated.
#[must_use]
pub fn allowed_tool_names(search_type: SearchType) -> &'static [&'static str] {
    match search_type {
        SearchType::Default => &[RETRIEVE_PREVIOUS_SOURCES],
        SearchType::Rag => &[RAG_SEARCH, RETRIEVE_PREVIOUS_SOURCES],
        SearchType::Web => &[WEB_SEARCH, RETRIEVE_PREVIOUS_SOURCES],
        SearchType::RagWeb => &[RAG_SEARCH, WEB_SEARCH, RETRIEVE_PREVIOUS_SOURCES],
    }
}

/// The uniform failure envelope.
#[must_use]
pub fn failure(error: impl std::fmt::Display) -> Value {
    json!({
        "success": false,
        "error": error.to_string(),
        "results": [],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_only_previous_sources() {
        assert_eq!(
            allowed_tool_names(SearchType::Default),
            &[RETRIEVE_PREVIOUS_SOURCES]
        );
    }

    #[test]
    fn rag_web_binds_all_three() {
        let names = allowed_tool_names(SearchType::RagWeb);
        assert!(names.contains(&RAG_SEARCH));
        assert!(names.contains(&WEB_SEARCH));
        assert!(names.contains(&RETRIEVE_PREVIOUS_SOURCES));
    }

    #[test]
    fn failure_envelope_shape() {
        let env = failure("nope");
        assert_eq!(env["success"], false);
        assert_eq!(env["error"], "nope");
        assert!(env["results"].as_array().unwrap().is_empty());
    }
}
