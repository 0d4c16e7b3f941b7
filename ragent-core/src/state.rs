//! Request-scoped state threaded through every pipeline stage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Provenance label of the caller that creates a state.
pub const USER: &str = "user";

/// The single mutable record one query carries through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Correlates log lines of one run.
    pub run_id: Uuid,
    query: String,
    pub refined_query: Option<String>,
    pub query_intent: Option<String>,
    pub query_complexity: Option<String>,
    pub requires_multi_hop: bool,
    pub retrieved_chunks: Vec<CanonicalRecord>,
    pub synthesized_response: Option<String>,
    pub final_report: Option<String>,
    pub metadata: StateMetadata,
    pub sender: String,
    pub receiver: String,
    /// Every hand-off recorded so far, oldest first.
    pub trail: Vec<Handoff>,
}

impl State {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            query: query.into(),
            refined_query: None,
            query_intent: None,
            query_complexity: None,
            requires_multi_hop: false,
            retrieved_chunks: Vec::new(),
            synthesized_response: None,
            final_report: None,
            metadata: StateMetadata::default(),
            sender: USER.to_string(),
            receiver: String::new(),
            trail: Vec::new(),
        }
    }

    /// The original user input. Never changes after construction.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The text retrieval should search with: the refined query when it is
    /// non-blank, otherwise the original query.
    pub fn search_text(&self) -> &str {
        match self.refined_query.as_deref() {
            Some(refined) if !refined.trim().is_empty() => refined,
            _ => &self.query,
        }
    }

    /// Record that `sender` wrote the state and `receiver` reads it next.
    pub fn hand_off(&mut self, sender: &str, receiver: &str) {
        self.sender = sender.to_string();
        self.receiver = receiver.to_string();
        self.trail.push(Handoff {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
        });
    }
}

/// One provenance step: who wrote the state and who reads it next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub sender: String,
    pub receiver: String,
}

/// Known side-channel annotations, plus an escape hatch for anything else.
///
/// Annotations are append-only: helpers add keys and extend lists but never
/// remove what an earlier stage wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub key_concepts: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl StateMetadata {
    /// Append key concepts, skipping blanks and ones already present.
    pub fn add_key_concepts<I, S>(&mut self, concepts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for concept in concepts {
            let concept = concept.into();
            let concept = concept.trim();
            if !concept.is_empty() && !self.key_concepts.iter().any(|c| c == concept) {
                self.key_concepts.push(concept.to_string());
            }
        }
    }

    /// Insert an extra annotation unless the key already exists.
    /// Returns whether the value was stored.
    pub fn annotate(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if self.extra.contains_key(&key) {
            return false;
        }
        self.extra.insert(key, value);
        true
    }
}

/// Identifier of a retrieved point: vector stores use integers or UUID strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Num(i64),
    Text(String),
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordId::Num(n) => write!(f, "{n}"),
            RecordId::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<usize> for RecordId {
    fn from(index: usize) -> Self {
        RecordId::Num(i64::try_from(index).unwrap_or(i64::MAX))
    }
}

/// A normalized retrieval result.
///
/// `score` is always finite and `payload` is always a map, so downstream code
/// can index into it unconditionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: RecordId,
    pub score: f64,
    pub payload: Map<String, Value>,
}

impl CanonicalRecord {
    pub fn new(id: RecordId, score: f64, payload: Map<String, Value>) -> Self {
        Self {
            id,
            score: if score.is_finite() { score } else { 0.0 },
            payload,
        }
    }

    /// The chunk text, stored under `payload.content` by the ingestion side.
    pub fn content(&self) -> Option<&str> {
        self.payload.get("content").and_then(Value::as_str)
    }

    /// The originating document, if the payload records one.
    pub fn source(&self) -> Option<&str> {
        self.payload.get("source").and_then(Value::as_str)
    }
}
