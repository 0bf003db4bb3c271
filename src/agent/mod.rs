//! The conversation agent: a cooperative tool-calling loop over a bounded
//! three-node graph.
//!
//! ```text
//! start ──► agent ──(tool calls)──► tools ──► agent
//!             │
//!             └─(no tool calls)──► format_response ──► end
//! ```
//!
//! A hard visit cap bounds the loop; exceeding it jumps straight to
//! `format_response` so the run still produces a well-formed response from
//! whatever accumulated. Source IDs are renumbered by the tools node
//! through counters carried in [`AgentState`] — never globals.

pub mod nodes;
pub mod prompts;
pub mod sources;
pub mod state;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::message::ConversationMessage;
use crate::providers::ChatModel;
use crate::tools::Tool;
use nodes::{FormatResponseNode, LlmNode, Node, NodeRoute, ToolDispatchNode};

pub use sources::{ImageSource, RagSource, SourcePacket, SourcesEntry, WebSource};
pub use state::{AgentState, SearchType, Snapshot};

/// Hard cap on node visits per run.
pub const RECURSION_LIMIT: usize = 10;

/// What a finished run hands back to the service layer.
#[derive(Clone, Debug)]
pub struct AgentOutcome {
    pub response: String,
    pub rag_sources: Vec<RagSource>,
    pub web_sources: Vec<WebSource>,
    pub image_sources: Vec<ImageSource>,
    /// Messages this run appended (user message included), ready for
    /// persistence.
    pub new_messages: Vec<ConversationMessage>,
    /// Per-assistant source references to merge into stored state.
    pub sources_map: FxHashMap<String, SourcesEntry>,
}

/// The compiled agent graph.
pub struct AgentGraph {
    chat: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    recursion_limit: usize,
}

impl AgentGraph {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatModel>, tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            chat,
            tools,
            recursion_limit: RECURSION_LIMIT,
        }
    }

    /// Override the visit cap (tests and special deployments).
    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit.max(1);
        self
    }

    /// Drive the graph to completion.
    ///
    /// Chat-model failure aborts the run with a fallback assistant message
    /// carrying the error text and no sources. Tool failures are visible
    /// envelopes inside the run, not aborts.
    #[instrument(skip_all, fields(search_type = state.search_type.as_str()))]
    pub async fn run(&self, state: AgentState) -> AgentOutcome {
        let llm = LlmNode::new(Arc::clone(&self.chat), self.tools.clone());
        let dispatch = ToolDispatchNode::new(self.tools.clone());
        let format = FormatResponseNode;

        let mut state = state;
        let mut route = NodeRoute::Agent;
        let mut visits = 0usize;

        loop {
            if matches!(route, NodeRoute::Agent | NodeRoute::Tools)
                && visits >= self.recursion_limit
            {
                warn!(
                    target: "lectern::agent",
                    visits,
                    "recursion limit reached; finalizing with accumulated state"
                );
                route = NodeRoute::FormatResponse;
            }

            match route {
                NodeRoute::Agent => {
                    visits += 1;
                    match llm.run(state.clone()).await {
                        Ok((next_state, next_route)) => {
                            state = next_state;
                            route = next_route;
                        }
                        Err(err) => {
                            warn!(target: "lectern::agent", %err, "chat model failed; aborting run");
                            return Self::fallback_outcome(state, &err.to_string());
                        }
                    }
                }
                NodeRoute::Tools => {
                    visits += 1;
                    match dispatch.run(state.clone()).await {
                        Ok((next_state, next_route)) => {
                            state = next_state;
                            route = next_route;
                        }
                        Err(err) => {
                            warn!(target: "lectern::agent", %err, "tool dispatch failed; aborting run");
                            return Self::fallback_outcome(state, &err.to_string());
                        }
                    }
                }
                NodeRoute::FormatResponse => {
                    visits += 1;
                    match format.run(state.clone()).await {
                        Ok((next_state, _)) => {
                            state = next_state;
                        }
                        Err(err) => {
                            warn!(target: "lectern::agent", %err, "finalize failed; aborting run");
                            return Self::fallback_outcome(state, &err.to_string());
                        }
                    }
                    break;
                }
                NodeRoute::End => break,
            }
        }

        info!(
            target: "lectern::agent",
            visits,
            rag_sources = state.rag_sources.len(),
            web_sources = state.web_sources.len(),
            "agent run complete"
        );
        AgentOutcome {
            response: state.final_response.clone().unwrap_or_default(),
            rag_sources: state.rag_sources.clone(),
            web_sources: state.web_sources.clone(),
            image_sources: state.image_sources.clone(),
            new_messages: state.new_messages().to_vec(),
            sources_map: state.sources_map.clone(),
        }
    }

    /// Terminal outcome for a run the chat model killed: an assistant
    /// message describing the error, with every source list empty.
    fn fallback_outcome(mut state: AgentState, error: &str) -> AgentOutcome {
        let text = format!("I encountered an error processing your request: {error}");
        let mut fallback = ConversationMessage::assistant(text.clone());
        fallback.id = Some(Uuid::new_v4().to_string());
        state.messages.push(fallback);
        AgentOutcome {
            response: text,
            rag_sources: Vec::new(),
            web_sources: Vec::new(),
            image_sources: Vec::new(),
            new_messages: state.new_messages().to_vec(),
            sources_map: FxHashMap::default(),
        }
    }
}
