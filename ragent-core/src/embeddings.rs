//! Embedding providers for turning a query into a search vector.
//!
//! Provides an `Embedder` trait with implementations for local hashing,
//! the OpenAI API, and the Ollama API. The vector must come from the same
//! model that embedded the indexed documents, otherwise scores are meaningless.

use crate::config::EmbeddingConfig;
use crate::error::EmbedError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Trait for text embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return the provider name.
    fn provider_name(&self) -> &str;
}

/// Deterministic hashed term-frequency embedder. No network, no model.
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        // L2 normalize
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// djb2
fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// OpenAI API embedder (uses text-embedding-3-small by default).
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(
        client: Client,
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        let model = model.unwrap_or_else(|| "text-embedding-3-small".into());
        let dims = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        Self {
            client,
            api_key,
            model,
            dims,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com".into())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn parse_response(body: &Value) -> Result<Vec<f32>, EmbedError> {
        body["data"][0]["embedding"]
            .as_array()
            .map(|values| to_vector(values))
            .ok_or_else(|| EmbedError::ResponseParse {
                message: "Missing 'data[0].embedding' in response".to_string(),
            })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({"model": self.model, "input": text});
        let request = self.client.post(&url).bearer_auth(&self.api_key).json(&body);
        let response = send_json(request, "OpenAI").await?;
        Self::parse_response(&response)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

/// Ollama embedder (uses the local Ollama API).
pub struct OllamaEmbedder {
    client: Client,
    model: String,
    dims: usize,
    base_url: String,
}

impl OllamaEmbedder {
    pub fn new(client: Client, model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| "nomic-embed-text".into());
        let dims = match model.as_str() {
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 768,
        };
        Self {
            client,
            model,
            dims,
            base_url: base_url
                .unwrap_or_else(|| "http://localhost:11434".into())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn parse_response(body: &Value) -> Result<Vec<f32>, EmbedError> {
        body["embeddings"][0]
            .as_array()
            .map(|values| to_vector(values))
            .ok_or_else(|| EmbedError::ResponseParse {
                message: "Missing 'embeddings[0]' in response".to_string(),
            })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = json!({"model": self.model, "input": text});
        let response = send_json(self.client.post(&url).json(&body), "Ollama").await?;
        Self::parse_response(&response)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }
}

fn to_vector(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

async fn send_json(request: reqwest::RequestBuilder, provider: &str) -> Result<Value, EmbedError> {
    let response = request.send().await.map_err(|e| EmbedError::Request {
        message: format!("{provider} embedding request failed: {e}"),
    })?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(EmbedError::AuthFailed {
            provider: provider.to_string(),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EmbedError::Request {
            message: format!("HTTP {status} from {provider}: {body}"),
        });
    }

    response.json::<Value>().await.map_err(|e| EmbedError::ResponseParse {
        message: format!("Invalid JSON from {provider}: {e}"),
    })
}

/// Factory function to create an embedder based on configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedError> {
    let build_client = || {
        Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Request {
                message: format!("Failed to build HTTP client: {e}"),
            })
    };

    match config.provider.as_str() {
        "openai" => {
            let api_key = crate::providers::resolve_api_key_by_env(&config.api_key_env)
                .ok_or_else(|| EmbedError::AuthFailed {
                    provider: format!("openai (env var '{}' not set)", config.api_key_env),
                })?;
            Ok(Arc::new(OpenAiEmbedder::new(
                build_client()?,
                api_key,
                config.model.clone(),
                config.base_url.clone(),
            )))
        }
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(
            build_client()?,
            config.model.clone(),
            config.base_url.clone(),
        ))),
        "local" => Ok(Arc::new(LocalEmbedder::new(config.dimensions))),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, using local embedder");
            Ok(Arc::new(LocalEmbedder::new(config.dimensions)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_embedder_dimensions_and_norm() {
        let embedder = LocalEmbedder::new(64);
        let v = embedder.embed("docling converts pdf documents").await.unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_local_embedder_empty_text_is_zero() {
        let v = LocalEmbedder::new(16).embed("  ...  ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_local_embedder_deterministic_and_case_insensitive() {
        let embedder = LocalEmbedder::new(128);
        let a = embedder.embed("What is Docling?").await.unwrap();
        let b = embedder.embed("what is docling").await.unwrap();
        assert_eq!(a, b);
        let c = embedder.embed("vector databases").await.unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_local_embedder_zero_dimensions_clamped() {
        assert_eq!(LocalEmbedder::new(0).dimensions(), 1);
    }

    #[test]
    fn test_parse_openai_response() {
        let body = json!({"data": [{"embedding": [0.1, -0.2, 0.3]}]});
        assert_eq!(OpenAiEmbedder::parse_response(&body).unwrap().len(), 3);
        assert!(OpenAiEmbedder::parse_response(&json!({"data": []})).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let body = json!({"model": "nomic-embed-text", "embeddings": [[0.5, 0.5]]});
        assert_eq!(OllamaEmbedder::parse_response(&body).unwrap(), vec![0.5, 0.5]);
        assert!(OllamaEmbedder::parse_response(&json!({"embedding": [1.0]})).is_err());
    }

    #[test]
    fn test_create_embedder_by_provider() {
        let local = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(local.provider_name(), "local");
        assert_eq!(local.dimensions(), 768);

        let ollama = create_embedder(&EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("all-minilm".into()),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(ollama.dimensions(), 384);

        let missing_key = create_embedder(&EmbeddingConfig {
            provider: "openai".into(),
            api_key_env: "RAGENT_TEST_KEY_THAT_DOES_NOT_EXIST".into(),
            ..EmbeddingConfig::default()
        });
        assert!(matches!(missing_key, Err(EmbedError::AuthFailed { .. })));
    }
}
