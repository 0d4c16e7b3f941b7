//! Configuration system for ragent.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit config file -> environment.
//! Configuration is loaded from `~/.config/ragent/config.toml` and/or
//! `.ragent/config.toml` in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagentConfig {
    pub llm: LlmConfig,
    pub models: StageModels,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
}

/// Generative-model provider configuration, shared by all stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "gemini", "openai", "ollama", or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Whole-request timeout for the HTTP transport.
    pub timeout_secs: u64,
    /// Connect timeout for the HTTP transport.
    pub connect_timeout_secs: u64,
    /// Transport-level retry on transient errors.
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.3,
            timeout_secs: 120,
            connect_timeout_secs: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Validate this config and return any warnings.
    ///
    /// Returns an empty Vec if the config is valid. Problems are reported as
    /// human-readable warnings, never as errors.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "llm.temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.max_tokens == 0 {
            warnings.push("llm.max_tokens is 0; providers will reject requests".to_string());
        }
        if self.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0; every request will time out".to_string());
        }
        warnings
    }
}

/// Exponential backoff policy for transient provider errors.
///
/// Defaults to no retries: the pipeline surfaces model failures instead of
/// silently repeating calls unless a deployment opts in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Model identity per stage. Stages may run on differently sized models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageModels {
    pub refiner: String,
    pub synthesizer: String,
    pub reporter: String,
}

impl Default for StageModels {
    fn default() -> Self {
        Self {
            refiner: "gemini-2.0-flash".to_string(),
            synthesizer: "gemini-2.5-pro".to_string(),
            reporter: "gemini-2.5-pro".to_string(),
        }
    }
}

/// Configuration for the query embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider name: "local" (default), "ollama", "openai".
    pub provider: String,
    /// Provider-specific model name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Vector dimension; must match the collection the store was built with.
    pub dimensions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key (OpenAI only).
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: None,
            dimensions: 768,
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Configuration for the vector store the retriever searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend name: "qdrant" (default) or "memory".
    pub backend: String,
    pub url: String,
    /// Environment variable holding the Qdrant API key; unset means no auth header.
    pub api_key_env: String,
    pub collection: String,
    /// Number of nearest neighbours requested per query.
    pub top_k: usize,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "qdrant".to_string(),
            url: "http://localhost:6333".to_string(),
            api_key_env: "QDRANT_API_KEY".to_string(),
            collection: "document".to_string(),
            top_k: 5,
            timeout_secs: 30,
        }
    }
}

impl RagentConfig {
    /// Validate the whole configuration, collecting warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        if self.store.top_k == 0 {
            warnings.push("store.top_k is 0; retrieval will never return context".to_string());
        }
        if self.embedding.dimensions == 0 {
            warnings.push("embedding.dimensions is 0".to_string());
        }
        for (stage, model) in [
            ("refiner", &self.models.refiner),
            ("synthesizer", &self.models.synthesizer),
            ("reporter", &self.models.reporter),
        ] {
            if model.trim().is_empty() {
                warnings.push(format!("models.{stage} is empty"));
            }
        }
        warnings
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize {
            message: e.to_string(),
        })
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `RAGENT_`, nested with `__`)
/// 2. Explicit config file (`--config`)
/// 3. Workspace-local config (`.ragent/config.toml`)
/// 4. User config (`~/.config/ragent/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
) -> Result<RagentConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(RagentConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "ragent", "ragent") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".ragent").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    // RAGENT_STORE__COLLECTION, RAGENT_MODELS__REPORTER, ...
    figment = figment.merge(Env::prefixed("RAGENT_").split("__"));

    figment.extract().map_err(Box::new)
}
