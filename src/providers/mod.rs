//! External provider seams: chat completion, web search, object storage.

pub mod chat;
pub mod object_store;
pub mod search;

pub use chat::{ChatError, ChatModel, OpenAiCompatibleChat};
pub use object_store::{FsObjectStore, ObjectStore, ObjectStoreError};
pub use search::{TavilySearch, WebSearchClient, WebSearchError, WebSearchResult};
