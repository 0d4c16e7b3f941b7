//! Error types for the ragent core.
//!
//! Uses `thiserror` for public API error types with one enum per domain:
//! model calls, embeddings, vector stores, configuration, and the pipeline.
//! Structured-output parse failures are not here; they are
//! values (see [`crate::structured::ParseFailure`]) absorbed by the stages.

use crate::orchestrator::StageName;

/// Top-level error type for the ragent core library.
#[derive(Debug, thiserror::Error)]
pub enum RagentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("Vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from generative-model provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from embedding providers.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("Embedding request failed: {message}")]
    Request { message: String },

    #[error("Embedding response malformed: {message}")]
    ResponseParse { message: String },

    #[error("Missing credentials for embedding provider {provider}")]
    AuthFailed { provider: String },
}

/// Errors from vector store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Vector store connection failed: {message}")]
    Connection { message: String },

    #[error("Vector store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Collection not found: {collection}")]
    CollectionNotFound { collection: String },

    #[error("Vector store response malformed: {message}")]
    ResponseParse { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration could not be serialized: {message}")]
    Serialize { message: String },
}

/// Errors that escape [`crate::Orchestrator::run`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: StageName,
        #[source]
        source: LlmError,
    },

    #[error("pipeline run was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// The stage that failed, if the error came from a stage.
    pub fn stage(&self) -> Option<StageName> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            PipelineError::Cancelled => None,
        }
    }
}

/// A type alias for results using the top-level `RagentError`.
pub type Result<T> = std::result::Result<T, RagentError>;
