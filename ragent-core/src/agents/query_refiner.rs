//! Query refinement: classify the question and rewrite it for retrieval.

use super::{StageAgent, ask, labels};
use crate::brain::LlmProvider;
use crate::error::LlmError;
use crate::state::State;
use crate::structured;
use crate::types::CompletionRequest;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_INTENT: &str = "understand";
pub const DEFAULT_COMPLEXITY: &str = "medium";

pub const SYSTEM_PROMPT: &str = "You analyze questions for a document retrieval system. \
Respond with a single JSON object and nothing else.";

/// Analysis output is parsed, so it is sampled greedily.
pub const ANALYSIS_TEMPERATURE: f32 = 0.0;

/// The refiner's view of a model analysis, with every field already defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAnalysis {
    pub refined_query: String,
    pub intent: String,
    pub complexity: String,
    pub requires_multi_hop: bool,
    pub key_concepts: Vec<String>,
}

impl QueryAnalysis {
    /// The analysis used when the model output cannot be parsed at all.
    pub fn fallback(query: &str) -> Self {
        Self {
            refined_query: query.to_string(),
            intent: DEFAULT_INTENT.to_string(),
            complexity: DEFAULT_COMPLEXITY.to_string(),
            requires_multi_hop: false,
            key_concepts: vec![query.to_string()],
        }
    }

    /// Read a parsed model object, defaulting each missing, empty or mistyped field.
    pub fn from_map(query: &str, map: &Map<String, Value>) -> Self {
        let fallback = Self::fallback(query);

        let key_concepts: Vec<String> = match map.get("key_concepts") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Self {
            refined_query: non_blank(map.get("refined_query"))
                .map(str::to_string)
                .unwrap_or(fallback.refined_query),
            intent: non_blank(map.get("intent"))
                .map(str::to_lowercase)
                .unwrap_or(fallback.intent),
            complexity: non_blank(map.get("complexity"))
                .map(str::to_lowercase)
                .unwrap_or(fallback.complexity),
            requires_multi_hop: truthy(map.get("requires_multi_hop")),
            key_concepts: if key_concepts.is_empty() {
                fallback.key_concepts
            } else {
                key_concepts
            },
        }
    }
}

fn non_blank(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// `true`, or the strings "yes"/"true" in any case. Everything else is false.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("yes") || s.eq_ignore_ascii_case("true")
        }
        _ => false,
    }
}

/// Asks a small, fast model to analyze the query and rewrite it for search.
pub struct QueryRefiner {
    llm: Arc<dyn LlmProvider>,
}

impl QueryRefiner {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub fn build_prompt(query: &str) -> String {
        format!(
            r#"Analyze this query and provide structured insights:

Query: {query}

Provide:
1. Intent: What is the user trying to achieve? (understand/compare/analyze/create/troubleshoot)
2. Complexity: simple/medium/complex
3. RequiresMultiHop: Does this need information from multiple sources? (true/false)
4. KeyConcepts: List 3-5 key concepts to search for
5. RefinedQuery: An improved version optimized for retrieval

Return ONLY valid JSON:
{{
    "intent": "...",
    "complexity": "...",
    "requires_multi_hop": true,
    "key_concepts": ["...", "..."],
    "refined_query": "..."
}}"#
        )
    }

    /// One model call, then parse with full defaulting. Only the call itself can fail.
    pub async fn analyze(&self, query: &str) -> Result<QueryAnalysis, LlmError> {
        let request = CompletionRequest::instructed(SYSTEM_PROMPT, Self::build_prompt(query))
            .with_temperature(ANALYSIS_TEMPERATURE);
        let raw = ask(self.llm.as_ref(), request).await?;
        match structured::parse(&raw) {
            Ok(map) => Ok(QueryAnalysis::from_map(query, &map)),
            Err(failure) => {
                warn!(
                    error = %failure,
                    raw_len = failure.raw.len(),
                    "Query analysis was not valid JSON, using defaults"
                );
                debug!(raw = failure.raw.as_str(), "Unparsed query analysis");
                Ok(QueryAnalysis::fallback(query))
            }
        }
    }
}

#[async_trait]
impl StageAgent for QueryRefiner {
    fn label(&self) -> &'static str {
        labels::QUERY_REFINER
    }

    async fn execute(&self, state: &mut State) -> Result<(), LlmError> {
        let analysis = self.analyze(state.query()).await?;

        info!(
            intent = analysis.intent.as_str(),
            complexity = analysis.complexity.as_str(),
            multi_hop = analysis.requires_multi_hop,
            "Query refined"
        );

        state.refined_query = Some(analysis.refined_query);
        state.query_intent = Some(analysis.intent);
        state.query_complexity = Some(analysis.complexity);
        state.requires_multi_hop = analysis.requires_multi_hop;
        state.metadata.add_key_concepts(analysis.key_concepts);
        state.hand_off(labels::QUERY_REFINER, labels::RETRIEVER);
        Ok(())
    }
}
