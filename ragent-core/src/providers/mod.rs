//! Generative-model provider implementations.
//!
//! Provides concrete implementations of the `LlmProvider` trait for:
//! - Google Gemini API (the default for every stage)
//! - OpenAI-compatible APIs (OpenAI, Ollama, vLLM, LM Studio)
//!
//! Use `create_provider()` to instantiate the appropriate provider for one
//! stage's model id.

pub mod gemini;
pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::RetryConfig;
pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatibleProvider;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`),
/// `LlmError::Connection`, and `LlmError::Timeout`. Permanent errors (auth,
/// parse) return immediately. With `max_retries = 0` the operation runs once.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt == config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| LlmError::Connection {
        message: "All retry attempts exhausted".to_string(),
    }))
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    if let LlmError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs.saturating_mul(1000);
        let computed = compute_exponential_backoff(config, attempt);
        return server_ms.max(computed);
    }
    compute_exponential_backoff(config, attempt)
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% jitter
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Cheap pseudo-random in [0, 1) from the clock, good enough for jitter.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Build the shared HTTP client shape used by every provider.
pub(crate) fn build_http_client(
    timeout_secs: u64,
    connect_timeout_secs: u64,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .build()
}

/// Classify a transport failure so `with_retry` can tell transient from fatal.
///
/// The request URL is stripped from the message: endpoints may carry
/// credentials, and these messages end up in logs and on the terminal.
pub(crate) fn map_transport_error(provider: &str, timeout_secs: u64, err: reqwest::Error) -> LlmError {
    let err = err.without_url();
    if err.is_timeout() {
        LlmError::Timeout { timeout_secs }
    } else if err.is_connect() {
        LlmError::Connection {
            message: format!("{provider}: {err}"),
        }
    } else {
        LlmError::ApiRequest {
            message: format!("Request to {provider} failed: {err}"),
        }
    }
}

/// Read an API key from the named environment variable, treating blank as unset.
pub fn resolve_api_key_by_env(env_var: &str) -> Option<String> {
    std::env::var(env_var)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Create a provider serving `model` from the shared model configuration.
///
/// `"gemini"` selects [`GeminiProvider`]; any other provider name is treated
/// as an OpenAI-compatible endpoint.
pub fn create_provider(config: &LlmConfig, model: &str) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "gemini" | "google" => Ok(Arc::new(GeminiProvider::new(config, model)?)),
        _ => Ok(Arc::new(OpenAiCompatibleProvider::new(config, model)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config(provider: &str, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            api_key_env: "RAGENT_TEST_KEY_THAT_DOES_NOT_EXIST".to_string(),
            base_url: base_url.map(str::to_string),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_create_provider_gemini_missing_key() {
        let result = create_provider(&test_config("gemini", None), "gemini-2.0-flash");
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
    }

    #[test]
    fn test_create_provider_local_openai_compatible() {
        let config = test_config("ollama", Some("http://localhost:11434/v1"));
        let provider = create_provider(&config, "llama3.1:8b").unwrap();
        assert_eq!(provider.model_name(), "llama3.1:8b");
    }

    #[test]
    fn test_resolve_api_key_missing() {
        assert!(resolve_api_key_by_env("RAGENT_TEST_KEY_THAT_DOES_NOT_EXIST").is_none());
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&LlmError::RateLimited {
            retry_after_secs: 30
        }));
        assert!(is_retryable(&LlmError::Connection {
            message: "refused".into()
        }));
        assert!(is_retryable(&LlmError::Timeout { timeout_secs: 30 }));
        assert!(!is_retryable(&LlmError::AuthFailed {
            provider: "test".into()
        }));
        assert!(!is_retryable(&LlmError::ResponseParse {
            message: "bad json".into()
        }));
        assert!(!is_retryable(&LlmError::ApiRequest {
            message: "HTTP 500".into()
        }));
    }

    #[test]
    fn test_compute_backoff_exponential() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 1000);
        assert_eq!(compute_exponential_backoff(&config, 1), 2000);
        assert_eq!(compute_exponential_backoff(&config, 2), 4000);
    }

    #[test]
    fn test_compute_backoff_respects_cap() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 3000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(compute_exponential_backoff(&config, 2), 3000);
    }

    #[test]
    fn test_compute_backoff_rate_limit_uses_server_value() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        let err = LlmError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 30000);
    }

    #[tokio::test]
    async fn test_with_retry_default_runs_once() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryConfig::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(LlmError::Connection {
                message: "refused".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient() {
        let config = RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let calls = AtomicU32::new(0);
        let result = with_retry(&config, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(LlmError::Timeout { timeout_secs: 1 })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_no_retry() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            ..RetryConfig::default()
        };
        let calls = AtomicU32::new(0);
        let result = with_retry(&config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(LlmError::AuthFailed {
                provider: "test".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
