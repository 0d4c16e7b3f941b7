//! # Ragent Core
//!
//! Core library for the ragent retrieval-augmented answering pipeline.
//! A query is refined, used to retrieve passages from a vector store,
//! synthesized into an answer, and formatted as a Markdown report, with one
//! shared request state carried through all four stages.

pub mod agents;
pub mod brain;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod retrieval;
pub mod state;
pub mod structured;
pub mod types;

// Re-export commonly used types at the crate root.
pub use agents::{QueryRefiner, Reporter, Retriever, StageAgent, Synthesizer};
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{RagentConfig, load_config};
pub use embeddings::{Embedder, LocalEmbedder};
pub use error::{
    ConfigError, EmbedError, LlmError, PipelineError, RagentError, Result, StoreError,
};
pub use orchestrator::{
    NoOpObserver, Orchestrator, PipelineObserver, RecordingObserver, StageName,
};
pub use retrieval::{InMemoryStore, VectorStore, normalize};
pub use state::{CanonicalRecord, Handoff, RecordId, State, StateMetadata};
pub use structured::ParseFailure;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
