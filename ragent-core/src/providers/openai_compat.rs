//! OpenAI-compatible provider.
//!
//! Supports OpenAI, Ollama, vLLM, LM Studio, and any endpoint that follows
//! the OpenAI chat completions API format.

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const PROVIDER: &str = "OpenAI-compatible";

/// OpenAI-compatible chat completions provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider from configuration.
    ///
    /// Reads the API key from `config.api_key_env`. Local endpoints (localhost)
    /// don't require a key and get a dummy bearer token instead.
    pub fn new(config: &LlmConfig, model: &str) -> Result<Self, LlmError> {
        let is_local = config
            .base_url
            .as_ref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = super::resolve_api_key_by_env(&config.api_key_env)
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local provider; using dummy bearer token");
                    Some("ollama".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;

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

    fn build_request_body(&self, request: &CompletionRequest, model: &str) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
            .collect();

        json!({
            "model": model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": request.temperature.unwrap_or(self.temperature),
        })
    }

    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, LlmError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        let usage = body
            .get("usage")
            .map(|u| TokenUsage {
                input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as usize,
                output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as usize,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            text: message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            usage,
            model: body
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(model)
                .to_string(),
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed ({})", status);
                LlmError::AuthFailed {
                    provider: PROVIDER.to_string(),
                }
            }
            429 => {
                // "Rate limit reached ... Please try again in 20s"
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim().trim_end_matches('.').trim_end_matches('s').parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            _ => LlmError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    async fn send_once(&self, model: &str, body: &Value) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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

        Self::parse_response(&response_json, model)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = self.model.as_str();
        let body = self.build_request_body(&request, model);

        debug!(
            model,
            base_url = self.base_url.as_str(),
            "Sending chat completion request"
        );

        super::with_retry(&self.retry, || self.send_once(model, &body)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use pretty_assertions::assert_eq;

    fn local_provider() -> OpenAiCompatibleProvider {
        let config = LlmConfig {
            provider: "ollama".into(),
            api_key_env: "RAGENT_TEST_KEY_THAT_DOES_NOT_EXIST".into(),
            base_url: Some("http://localhost:11434/v1/".into()),
            ..LlmConfig::default()
        };
        OpenAiCompatibleProvider::new(&config, "llama3.1:8b").unwrap()
    }

    #[test]
    fn test_local_provider_gets_dummy_key() {
        let p = local_provider();
        assert_eq!(p.api_key, "ollama");
        assert_eq!(p.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_remote_provider_requires_key() {
        let config = LlmConfig {
            provider: "openai".into(),
            api_key_env: "RAGENT_TEST_KEY_THAT_DOES_NOT_EXIST".into(),
            ..LlmConfig::default()
        };
        let result = OpenAiCompatibleProvider::new(&config, "gpt-4o-mini");
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
    }

    #[test]
    fn test_request_body() {
        let p = local_provider();
        let request = CompletionRequest {
            messages: vec![Message::system("Be terse."), Message::user("What is docling?")],
            temperature: Some(0.0),
        };
        let body = p.build_request_body(&request, "llama3.1:8b");
        assert_eq!(body["model"], "llama3.1:8b");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "What is docling?");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn test_parse_response() {
        let body = json!({
            "model": "llama3.1:8b",
            "choices": [{"message": {"role": "assistant", "content": "Docling parses documents."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 20, "completion_tokens": 4}
        });
        let response = OpenAiCompatibleProvider::parse_response(&body, "fallback").unwrap();
        assert_eq!(response.text, "Docling parses documents.");
        assert_eq!(response.usage.total(), 24);
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_response_null_content_is_empty() {
        let body = json!({"choices": [{"message": {"content": null}}]});
        let response = OpenAiCompatibleProvider::parse_response(&body, "m").unwrap();
        assert_eq!(response.text, "");
        assert_eq!(response.model, "m");
    }

    #[test]
    fn test_parse_response_no_choices() {
        let err = OpenAiCompatibleProvider::parse_response(&json!({"choices": []}), "m").unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
    }

    #[test]
    fn test_map_http_error_rate_limit_hint() {
        let body = r#"{"error": {"message": "Rate limit reached. Please try again in 20s"}}"#;
        match OpenAiCompatibleProvider::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, body) {
            LlmError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 20),
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert!(matches!(
            OpenAiCompatibleProvider::map_http_error(reqwest::StatusCode::UNAUTHORIZED, ""),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            OpenAiCompatibleProvider::map_http_error(reqwest::StatusCode::BAD_GATEWAY, "oops"),
            LlmError::ApiRequest { .. }
        ));
    }
}
