//! The four pipeline stages.
//!
//! Each stage transforms the shared [`State`] in place with exactly one
//! external call, then records the hand-off to the next stage.

pub mod query_refiner;
pub mod reporter;
pub mod retriever;
pub mod synthesizer;

use crate::brain::LlmProvider;
use crate::error::LlmError;
use crate::state::State;
use crate::types::CompletionRequest;
use async_trait::async_trait;
use tracing::info;

pub use query_refiner::QueryRefiner;
pub use reporter::Reporter;
pub use retriever::Retriever;
pub use synthesizer::Synthesizer;

/// Provenance labels written into `State::sender` / `State::receiver`.
pub mod labels {
    pub const QUERY_REFINER: &str = "query_refiner";
    pub const RETRIEVER: &str = "retriever";
    pub const SYNTHESIZER: &str = "synthesizer";
    pub const REPORTER: &str = "reporter";
    pub const USER: &str = crate::state::USER;
}

/// A single pipeline stage.
///
/// Only model-call failures escape `execute`; everything else a stage can
/// recover from is absorbed with a documented fallback.
#[async_trait]
pub trait StageAgent: Send + Sync {
    /// Provenance label this stage writes as `sender`.
    fn label(&self) -> &'static str;

    async fn execute(&self, state: &mut State) -> Result<(), LlmError>;
}

/// Send one request and log its token usage. Returns the response text.
pub(crate) async fn ask(llm: &dyn LlmProvider, request: CompletionRequest) -> Result<String, LlmError> {
    let response = llm.complete(request).await?;
    info!(
        model = response.model.as_str(),
        input_tokens = response.usage.input_tokens,
        output_tokens = response.usage.output_tokens,
        total_tokens = response.usage.total(),
        "Model call complete"
    );
    Ok(response.text)
}
