//! Lectern: a retrieval-augmented course assistant.
//!
//! The crate implements three operations over a shared set of collaborators:
//!
//! ```text
//! PDF bytes ──► chunking ──► ingestion::embed_and_save ──► ChunkStore
//!                                   │
//!                                   └─► EmbeddingClient (batched, retried)
//!
//! Question ──► history::StateManager ──► agent::AgentGraph ──┬─► tools::rag_search ──► retrieval::Retriever
//!                    │                                       ├─► tools::web_search
//!                    │                                       └─► tools::retrieve_previous_sources
//!                    └──────────── append messages + sources ◄┘
//!
//! (course, slide, file) ──► service::delete ──► ChunkStore bulk delete
//! ```
//!
//! The vector-capable document store, the cache, object storage, and the
//! embedding / chat / web-search providers are external collaborators; the
//! crate defines the trait seams in [`stores`] and [`providers`] and ships
//! in-memory backends plus HTTP clients for them.
//!
//! [`service::LecternService`] is the operation surface a transport layer
//! (HTTP or otherwise) would call.

pub mod agent;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod history;
pub mod ingestion;
pub mod message;
pub mod providers;
pub mod retrieval;
pub mod retry;
pub mod service;
pub mod stores;
pub mod telemetry;
pub mod tools;

pub use agent::{AgentGraph, AgentOutcome, SearchType};
pub use chunking::{Chunk, ChunkerError, SplitLevel};
pub use config::Settings;
pub use history::StateManager;
pub use message::{ConversationMessage, Role};
pub use retrieval::Retriever;
pub use service::LecternService;
