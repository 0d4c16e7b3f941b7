//! Vector store backends.
//!
//! A store only has to answer nearest-neighbour queries. It returns the raw
//! response body untouched; [`super::normalize`] deals with its shape.

use crate::config::StoreConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// A searchable collection of embedded points.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `limit` points closest to `vector`, in the backend's own format.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Value, StoreError>;
}

/// Qdrant over its REST API.
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: crate::providers::resolve_api_key_by_env(&config.api_key_env),
        })
    }

    fn query_url(&self, collection: &str) -> String {
        format!("{}/collections/{}/points/query", self.base_url, collection)
    }

    fn query_body(vector: &[f32], limit: usize) -> Value {
        json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Value, StoreError> {
        let url = self.query_url(collection);
        debug!(url = url.as_str(), limit, "Querying Qdrant");

        let mut request = self.client.post(&url).json(&Self::query_body(vector, limit));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request.send().await.map_err(|e| StoreError::Connection {
            message: e.to_string(),
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::CollectionNotFound {
                collection: collection.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| StoreError::ResponseParse {
                message: e.to_string(),
            })?;
        if let Some(result) = body.as_object_mut().and_then(|m| m.remove("result")) {
            return Ok(result);
        }
        Ok(body)
    }
}

#[derive(Debug, Clone)]
struct StoredPoint {
    id: Value,
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

/// An in-process store with brute-force cosine similarity.
///
/// Used for tests and for running the pipeline without a Qdrant server.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<StoredPoint>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a point. `id` should be an integer or string.
    pub fn upsert(
        &self,
        collection: &str,
        id: impl Into<Value>,
        vector: Vec<f32>,
        payload: Map<String, Value>,
    ) {
        let id = id.into();
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let points = collections.entry(collection.to_string()).or_default();
        points.retain(|p| p.id != id);
        points.push(StoredPoint {
            id,
            vector,
            payload,
        });
    }

    /// Number of points in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Value, StoreError> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let points = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound {
                collection: collection.to_string(),
            })?;

        let mut scored: Vec<(f64, &StoredPoint)> = points
            .iter()
            .map(|p| (cosine_similarity(vector, &p.vector), p))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let hits: Vec<Value> = scored
            .into_iter()
            .take(limit)
            .map(|(score, p)| json!({"id": p.id, "score": score, "payload": p.payload}))
            .collect();
        Ok(Value::Array(hits))
    }
}

/// Create the store named by `config.backend`.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>, StoreError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "qdrant" => Ok(Arc::new(QdrantStore::new(config)?)),
        other => {
            tracing::warn!(backend = other, "Unknown store backend, using qdrant");
            Ok(Arc::new(QdrantStore::new(config)?))
        }
    }
}
