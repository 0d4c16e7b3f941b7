//! Google Gemini provider.
//!
//! Talks to the `generateContent` REST endpoint with the API key passed in
//! the `x-goog-api-key` header. System messages are lifted into the top-level
//! `system_instruction` field the API expects.

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const PROVIDER: &str = "Gemini";

/// Gemini `generateContent` provider.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl GeminiProvider {
    /// Create a provider for `model`, reading the API key from `config.api_key_env`.
    pub fn new(config: &LlmConfig, model: &str) -> Result<Self, LlmError> {
        let api_key = super::resolve_api_key_by_env(&config.api_key_env).ok_or_else(|| {
            LlmError::AuthFailed {
                provider: format!("Gemini (env var '{}' not set)", config.api_key_env),
            }
        })?;
        Self::new_with_key(config, model, api_key)
    }

    /// Create a provider with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, model: &str, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = super::build_http_client(config.timeout_secs, config.connect_timeout_secs)
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: model.to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            retry: config.retry.clone(),
        })
    }

    /// Build the JSON request body for the Gemini API.
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let contents: Vec<Value> = request
            .messages
            .iter()
            .filter(|msg| msg.role == Role::User)
            .map(|msg| json!({"role": "user", "parts": [{"text": msg.content}]}))
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": self.max_tokens,
                "temperature": request.temperature.unwrap_or(self.temperature),
            },
        });

        if let Some(system) = request.system_text() {
            body["system_instruction"] = json!({"parts": [{"text": system}]});
        }

        body
    }

    /// Parse a `generateContent` response body.
    ///
    /// Text parts of the first candidate are concatenated; a candidate with no
    /// text parts yields an empty string rather than an error.
    fn parse_response(body: &Value) -> Result<CompletionResponse, LlmError> {
        let candidate = body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing or empty 'candidates' array in response".to_string(),
            })?;

        let parts = candidate["content"]["parts"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'parts' array in candidate content".to_string(),
            })?;

        let text = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        let usage_metadata = &body["usageMetadata"];
        let usage = TokenUsage {
            input_tokens: usage_metadata["promptTokenCount"].as_u64().unwrap_or(0) as usize,
            output_tokens: usage_metadata["candidatesTokenCount"].as_u64().unwrap_or(0) as usize,
        };

        Ok(CompletionResponse {
            text,
            usage,
            model: body["modelVersion"].as_str().unwrap_or("gemini").to_string(),
            finish_reason: candidate["finishReason"].as_str().map(str::to_string),
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 30,
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
        }
    }

    fn endpoint_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn send_once(&self, body: &Value) -> Result<CompletionResponse, LlmError> {
        let response = self
            .client
            .post(self.endpoint_url(&self.model))
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| super::map_transport_error(PROVIDER, self.timeout_secs, e))?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ResponseParse {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON in response: {}", e),
            })?;

        Self::parse_response(&response_json)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request_body(&request);

        debug!(
            model = self.model.as_str(),
            messages = request.messages.len(),
            "Sending Gemini completion request"
        );

        super::with_retry(&self.retry, || self.send_once(&body)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn provider() -> GeminiProvider {
        GeminiProvider::new_with_key(&LlmConfig::default(), "gemini-2.0-flash", "test-key".into())
            .unwrap()
    }

    #[test]
    fn test_endpoint_url_carries_model_not_key() {
        let p = provider();
        assert_eq!(
            p.endpoint_url("gemini-2.5-pro"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent"
        );
        assert_eq!(p.model_name(), "gemini-2.0-flash");
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let config = LlmConfig {
            base_url: Some("http://localhost:8080/v1beta/".into()),
            ..LlmConfig::default()
        };
        let p = GeminiProvider::new_with_key(&config, "m", "k".into()).unwrap();
        assert_eq!(
            p.endpoint_url("m"),
            "http://localhost:8080/v1beta/models/m:generateContent"
        );
    }

    #[tokio::test]
    async fn test_transport_error_does_not_reveal_api_key() {
        let config = LlmConfig {
            base_url: Some("http://127.0.0.1:1".into()),
            connect_timeout_secs: 2,
            ..LlmConfig::default()
        };
        let p = GeminiProvider::new_with_key(&config, "gemini-2.0-flash", "SECRET-KEY-123".into())
            .unwrap();

        let err = p.invoke("hi").await.unwrap_err();
        let shown = crate::error::PipelineError::Stage {
            stage: crate::orchestrator::StageName::RefineQuery,
            source: err,
        }
        .to_string();
        assert!(!shown.contains("SECRET-KEY-123"), "{shown}");
        assert!(!shown.contains("127.0.0.1:1/models"), "{shown}");
    }

    #[test]
    fn test_request_body_single_prompt() {
        let p = provider();
        let body = p.build_request_body(&CompletionRequest::from_prompt("What is docling?"));
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "What is docling?");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
        assert!(body.get("system_instruction").is_none());
    }

    #[test]
    fn test_request_body_lifts_system_message() {
        let p = provider();
        let request = CompletionRequest::instructed("Be terse.", "hi").with_temperature(0.0);
        let body = p.build_request_body(&request);
        assert_eq!(body["system_instruction"]["parts"][0]["text"], "Be terse.");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn test_parse_response_text() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Docling is "}, {"text": "a parser."}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 5},
            "modelVersion": "gemini-2.0-flash"
        });
        let response = GeminiProvider::parse_response(&body).unwrap();
        assert_eq!(response.text, "Docling is a parser.");
        assert_eq!(response.usage.total(), 17);
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(response.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_parse_response_missing_candidates() {
        let err = GeminiProvider::parse_response(&json!({"candidates": []})).unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
        let err = GeminiProvider::parse_response(&json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
    }

    #[test]
    fn test_map_http_error() {
        assert!(matches!(
            GeminiProvider::map_http_error(reqwest::StatusCode::FORBIDDEN, ""),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            GeminiProvider::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            LlmError::RateLimited { .. }
        ));
        let err = GeminiProvider::map_http_error(reqwest::StatusCode::BAD_REQUEST, "bad model");
        assert!(err.to_string().contains("bad model"));
    }
}
