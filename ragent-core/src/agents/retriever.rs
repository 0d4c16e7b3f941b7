//! Retrieval: embed the refined query and fetch the nearest chunks.

use super::{StageAgent, labels};
use crate::embeddings::Embedder;
use crate::error::LlmError;
use crate::retrieval::{VectorStore, normalize};
use crate::state::{CanonicalRecord, State};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default number of neighbours requested per query.
pub const DEFAULT_TOP_K: usize = 5;

/// Searches one collection of the vector store.
///
/// Never fails the pipeline: an embedding or store error leaves
/// `retrieved_chunks` empty so synthesis can still answer without context.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    collection: String,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Embed `text`, search, and normalize. Errors are logged and yield no records.
    pub async fn retrieve(&self, text: &str) -> Vec<CanonicalRecord> {
        let vector = match self.embedder.embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(
                    error = %e,
                    provider = self.embedder.provider_name(),
                    "Query embedding failed, continuing without context"
                );
                return Vec::new();
            }
        };

        let raw = match self.store.search(&self.collection, &vector, self.top_k).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    error = %e,
                    collection = self.collection.as_str(),
                    "Vector search failed, continuing without context"
                );
                return Vec::new();
            }
        };

        let records = normalize(&raw);
        if records.len() < self.top_k {
            debug!(
                requested = self.top_k,
                returned = records.len(),
                "Store returned fewer records than requested"
            );
        }
        records
    }
}

#[async_trait]
impl StageAgent for Retriever {
    fn label(&self) -> &'static str {
        labels::RETRIEVER
    }

    async fn execute(&self, state: &mut State) -> Result<(), LlmError> {
        let records = self.retrieve(state.search_text()).await;
        info!(
            count = records.len(),
            collection = self.collection.as_str(),
            "Retrieved chunks"
        );
        state.retrieved_chunks = records;
        state.hand_off(labels::RETRIEVER, labels::SYNTHESIZER);
        Ok(())
    }
}
