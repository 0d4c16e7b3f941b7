//! Brain module: generative-model provider abstraction.
//!
//! Defines the `LlmProvider` trait every stage talks to, plus a
//! `MockLlmProvider` with queued responses for tests and offline runs.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, TokenUsage};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

/// Trait for generative-model providers.
///
/// Each stage holds its own `Arc<dyn LlmProvider>`, so stages can be served
/// by different models (a small one for refinement, a larger one for synthesis).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Send a single prompt and return the response text.
    async fn invoke(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self.complete(CompletionRequest::from_prompt(prompt)).await?;
        Ok(response.text)
    }
}

/// A mock provider for testing that returns queued responses in order.
///
/// Once the queue is drained it falls back to a fixed response, so a mock
/// can serve any number of pipeline runs deterministically.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    fallback: String,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(Vec::new()),
            fallback: "I'm a mock LLM. No queued responses available.".to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        Self {
            fallback: text.to_string(),
            ..Self::new()
        }
    }

    /// Queue a text response to be returned by the next `complete` call.
    pub fn queue_response(&self, text: &str) {
        self.lock_responses().push(Ok(Self::text_response(text)));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.lock_responses().push(Err(error));
    }

    /// Every request this provider has received, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The user-turn text of every request, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests().iter().map(CompletionRequest::user_text).collect()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, Vec<Result<CompletionResponse, LlmError>>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let mut responses = self.lock_responses();
        if responses.is_empty() {
            Ok(MockLlmProvider::text_response(&self.fallback))
        } else {
            responses.remove(0)
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
