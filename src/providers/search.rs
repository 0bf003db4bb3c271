//! Web-search seam and a Tavily-style HTTP client.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// One web search hit.
#[derive(Clone, Debug, Deserialize)]
pub struct WebSearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f32,
}

/// Errors from the web-search provider.
#[derive(Debug, Error, Diagnostic)]
pub enum WebSearchError {
    #[error("web search transport error: {0}")]
    #[diagnostic(code(lectern::web_search::transport))]
    Transport(String),

    #[error("web search provider error (status {status}): {message}")]
    #[diagnostic(code(lectern::web_search::provider))]
    Provider { status: u16, message: String },

    #[error("malformed web search response: {0}")]
    #[diagnostic(code(lectern::web_search::malformed))]
    Malformed(String),
}

/// External web-search collaborator.
#[async_trait]
pub trait WebSearchClient: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebSearchResult>, WebSearchError>;
}

/// HTTP client for a Tavily-style search endpoint.
#[derive(Clone)]
pub struct TavilySearch {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<WebSearchResult>,
}

impl TavilySearch {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.tavily.com";

    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, Self::DEFAULT_BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl WebSearchClient for TavilySearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebSearchResult>, WebSearchError> {
        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "max_results": max_results,
            }))
            .send()
            .await
            .map_err(|e| WebSearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WebSearchError::Provider {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| WebSearchError::Malformed(e.to_string()))?;
        let mut results = parsed.results;
        results.truncate(max_results);
        Ok(results)
    }
}
