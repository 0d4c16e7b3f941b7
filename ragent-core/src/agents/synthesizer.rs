//! Synthesis: answer the question from the retrieved context.

use super::{StageAgent, ask, labels};
use crate::brain::LlmProvider;
use crate::error::LlmError;
use crate::state::{CanonicalRecord, State};
use crate::types::CompletionRequest;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Substituted when the model answers with nothing at all.
pub const INSUFFICIENT_INFORMATION: &str =
    "There is insufficient information available to answer this question.";

pub const SYSTEM_PROMPT: &str = "You are an analytical research assistant specializing in \
synthesizing information from multiple retrieved sources.
Combine evidence from the provided context to form a coherent, factual, and technically \
accurate answer to the user's query.
Avoid speculation and clearly indicate any uncertainty or missing data.";

const NO_CONTEXT: &str = "No context is available: the document store returned no relevant passages. \
Say that there is insufficient information to answer rather than guessing.";

pub struct Synthesizer {
    llm: Arc<dyn LlmProvider>,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// `Context[i]:\n<content>` blocks separated by blank lines.
    pub fn format_context(chunks: &[CanonicalRecord]) -> String {
        chunks
            .iter()
            .enumerate()
            .map(|(idx, chunk)| format!("Context[{idx}]:\n{}", chunk.content().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn build_prompt(query: &str, chunks: &[CanonicalRecord]) -> String {
        let context = if chunks.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            Self::format_context(chunks)
        };
        format!(
            "Context:
{context}

User Query: {query}

Provide a clear and concise answer."
        )
    }

    pub async fn synthesize(&self, query: &str, chunks: &[CanonicalRecord]) -> Result<String, LlmError> {
        let request = CompletionRequest::instructed(SYSTEM_PROMPT, Self::build_prompt(query, chunks));
        let text = ask(self.llm.as_ref(), request).await?;
        if text.trim().is_empty() {
            warn!("Synthesizer model returned empty text, substituting fallback answer");
            return Ok(INSUFFICIENT_INFORMATION.to_string());
        }
        Ok(text)
    }
}

#[async_trait]
impl StageAgent for Synthesizer {
    fn label(&self) -> &'static str {
        labels::SYNTHESIZER
    }

    async fn execute(&self, state: &mut State) -> Result<(), LlmError> {
        let response = self.synthesize(state.query(), &state.retrieved_chunks).await?;
        info!(
            chunks = state.retrieved_chunks.len(),
            chars = response.len(),
            "Synthesized response"
        );
        state.synthesized_response = Some(response);
        state
            .metadata
            .annotate("synthesis_model", self.llm.model_name().into());
        state.hand_off(labels::SYNTHESIZER, labels::REPORTER);
        Ok(())
    }
}
