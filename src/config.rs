//! Environment-driven configuration.
//!
//! Settings resolve through [`SettingsBuilder`] from two sources, highest
//! precedence first:
//!
//! 1. Explicit overrides set on the builder
//! 2. Environment variables (including a `.env` file), when enabled via
//!    [`SettingsBuilder::with_env`]
//!
//! Anything still unresolved falls back to a compiled default or fails
//! validation in [`SettingsBuilder::build`]. All recognized options are
//! resolved once at startup; a missing or malformed required variable is a
//! [`ConfigError`] at that point, never a per-request surprise.
//!
//! ```rust,no_run
//! use lectern::config::Settings;
//!
//! # fn main() -> Result<(), lectern::config::ConfigError> {
//! let settings = Settings::builder()
//!     .with_env()
//!     .with_value("NUM_CANDIDATES", "5000")
//!     .build()?;
//! assert_eq!(settings.num_candidates, 5000);
//! # Ok(())
//! # }
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Errors raised while resolving [`Settings`].
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A required option is absent from every source.
    #[error("missing required environment variable: {key}")]
    #[diagnostic(
        code(lectern::config::missing),
        help("Set `{key}` in the environment or in a .env file.")
    )]
    Missing { key: &'static str },

    /// An option is present but cannot be parsed.
    #[error("invalid value for {key}: {message}")]
    #[diagnostic(code(lectern::config::invalid))]
    Invalid { key: &'static str, message: String },
}

/// Resolved service configuration.
///
/// Optional cache credentials select a hosted cache; when absent the local
/// host/port/db fallback applies. Collection names address the two document
/// collections the primary store holds (chunks and conversations).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Object-storage bucket holding course PDFs.
    pub s3_bucket: String,

    /// Embedding provider credential.
    pub embedding_api_key: String,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Output dimension for all embeddings.
    pub embedding_dim: usize,

    /// Primary store connection URI.
    pub store_uri: String,
    /// Primary store database name.
    pub store_database: String,
    /// Collection holding chunk documents.
    pub chunks_collection: String,
    /// Collection holding conversation threads.
    pub conversations_collection: String,
    /// Name of the ANN index over the embedding field.
    pub vector_index_name: String,
    /// Candidate pool size for ANN searches.
    pub num_candidates: usize,

    /// Hosted cache endpoint (optional; local fallback otherwise).
    pub cache_url: Option<String>,
    /// Hosted cache credential.
    pub cache_token: Option<String>,
    /// Local cache fallback host.
    pub cache_host: String,
    /// Local cache fallback port.
    pub cache_port: u16,
    /// Local cache fallback database index.
    pub cache_db: u8,

    /// Chat-completion provider credential.
    pub llm_api_key: String,
    /// Chat model identifier.
    pub chat_model: String,
    /// Web-search provider credential.
    pub web_search_api_key: String,
}

impl Settings {
    /// Default embedding dimension when `EMBEDDING_DIM` is unset.
    pub const DEFAULT_EMBEDDING_DIM: usize = 512;
    /// Default ANN candidate pool when `NUM_CANDIDATES` is unset.
    pub const DEFAULT_NUM_CANDIDATES: usize = 10_000;

    /// Start a builder with no sources enabled.
    #[must_use]
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Resolve settings from the process environment (and `.env` if
    /// present).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder().with_env().build()
    }
}

/// Builder for [`Settings`], layering explicit overrides on top of the
/// environment.
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    use_env: bool,
    overrides: FxHashMap<&'static str, String>,
}

impl SettingsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the environment as a source.
    ///
    /// `build` will load a `.env` file if one is present.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Set an option by its environment-variable name. Overrides take
    /// precedence over the environment.
    #[must_use]
    pub fn with_value(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.overrides.insert(key, value.into());
        self
    }

    /// Resolve and validate the final settings.
    pub fn build(self) -> Result<Settings, ConfigError> {
        if self.use_env {
            dotenvy::dotenv().ok();
        }

        Ok(Settings {
            s3_bucket: self.require("S3_BUCKET_NAME")?,
            embedding_api_key: self
                .optional("EMBEDDING_API_KEY")
                .or_else(|| self.optional("VOYAGE_API_KEY"))
                .ok_or(ConfigError::Missing {
                    key: "EMBEDDING_API_KEY",
                })?,
            embedding_model: self
                .optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "voyage-3.5-lite".to_string()),
            embedding_dim: self.parsed("EMBEDDING_DIM", Settings::DEFAULT_EMBEDDING_DIM)?,
            store_uri: self.require("STORE_URI")?,
            store_database: self.require("STORE_DATABASE")?,
            chunks_collection: self
                .optional("CHUNKS_COLLECTION")
                .unwrap_or_else(|| "chunks".to_string()),
            conversations_collection: self
                .optional("CONVERSATIONS_COLLECTION")
                .unwrap_or_else(|| "conversations".to_string()),
            vector_index_name: self.require("VECTOR_INDEX_NAME")?,
            num_candidates: self.parsed("NUM_CANDIDATES", Settings::DEFAULT_NUM_CANDIDATES)?,
            cache_url: self.optional("CACHE_URL"),
            cache_token: self.optional("CACHE_TOKEN"),
            cache_host: self
                .optional("CACHE_HOST")
                .unwrap_or_else(|| "localhost".to_string()),
            cache_port: self.parsed("CACHE_PORT", 6379)?,
            cache_db: self.parsed("CACHE_DB", 0)?,
            llm_api_key: self.require("LLM_API_KEY")?,
            chat_model: self
                .optional("CHAT_MODEL")
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            web_search_api_key: self.require("WEB_SEARCH_API_KEY")?,
        })
    }

    fn optional(&self, key: &'static str) -> Option<String> {
        self.overrides
            .get(key)
            .cloned()
            .or_else(|| {
                if self.use_env {
                    std::env::var(key).ok()
                } else {
                    None
                }
            })
            .filter(|v| !v.trim().is_empty())
    }

    fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing { key })
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: e.to_string(),
            }),
            None => Ok(default),
        }
    }
}
