//! Pipeline orchestrator.
//!
//! Drives one query's [`State`] through the four stages in a fixed order:
//!
//! ```text
//! START -> refine_query -> retrieve_data -> synthesize_data -> generate_report -> END
//! ```
//!
//! The orchestrator holds no per-request data, so one instance can serve many
//! concurrent `run` calls.

use crate::agents::{QueryRefiner, Reporter, Retriever, StageAgent, Synthesizer};
use crate::config::RagentConfig;
use crate::embeddings::create_embedder;
use crate::error::{PipelineError, RagentError};
use crate::providers::create_provider;
use crate::retrieval::create_store;
use crate::state::State;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// A node of the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    RefineQuery,
    RetrieveData,
    SynthesizeData,
    GenerateReport,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [StageName; 4] = [
        StageName::RefineQuery,
        StageName::RetrieveData,
        StageName::SynthesizeData,
        StageName::GenerateReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::RefineQuery => "refine_query",
            StageName::RetrieveData => "retrieve_data",
            StageName::SynthesizeData => "synthesize_data",
            StageName::GenerateReport => "generate_report",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress notifications for a pipeline run.
///
/// Observers never see the state and cannot affect control flow.
#[async_trait]
pub trait PipelineObserver: Send + Sync {
    async fn on_stage_start(&self, _stage: StageName) {}

    async fn on_stage_complete(&self, _stage: StageName, _elapsed_ms: u64) {}
}

/// Observer that ignores every event.
pub struct NoOpObserver;

#[async_trait]
impl PipelineObserver for NoOpObserver {}

/// Observer that records events, for tests.
#[derive(Default)]
pub struct RecordingObserver {
    started: tokio::sync::Mutex<Vec<StageName>>,
    completed: tokio::sync::Mutex<Vec<(StageName, u64)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn started(&self) -> Vec<StageName> {
        self.started.lock().await.clone()
    }

    pub async fn completed(&self) -> Vec<StageName> {
        self.completed
            .lock()
            .await
            .iter()
            .map(|(stage, _)| *stage)
            .collect()
    }
}

#[async_trait]
impl PipelineObserver for RecordingObserver {
    async fn on_stage_start(&self, stage: StageName) {
        self.started.lock().await.push(stage);
    }

    async fn on_stage_complete(&self, stage: StageName, elapsed_ms: u64) {
        self.completed.lock().await.push((stage, elapsed_ms));
    }
}

/// The linear four-stage pipeline.
pub struct Orchestrator {
    refiner: QueryRefiner,
    retriever: Retriever,
    synthesizer: Synthesizer,
    reporter: Reporter,
    observer: Arc<dyn PipelineObserver>,
}

impl Orchestrator {
    pub fn new(
        refiner: QueryRefiner,
        retriever: Retriever,
        synthesizer: Synthesizer,
        reporter: Reporter,
    ) -> Self {
        Self {
            refiner,
            retriever,
            synthesizer,
            reporter,
            observer: Arc::new(NoOpObserver),
        }
    }

    /// Build every capability from configuration: one provider per model
    /// stage, the embedder, and the vector store.
    pub fn from_config(config: &RagentConfig) -> Result<Self, RagentError> {
        for warning in config.validate() {
            warn!(warning = warning.as_str(), "Configuration warning");
        }

        let refiner_llm = create_provider(&config.llm, &config.models.refiner)?;
        let synthesizer_llm = create_provider(&config.llm, &config.models.synthesizer)?;
        let reporter_llm = create_provider(&config.llm, &config.models.reporter)?;
        let embedder = create_embedder(&config.embedding)?;
        let store = create_store(&config.store)?;

        debug!(
            refiner = config.models.refiner.as_str(),
            synthesizer = config.models.synthesizer.as_str(),
            reporter = config.models.reporter.as_str(),
            embedder = embedder.provider_name(),
            collection = config.store.collection.as_str(),
            "Pipeline assembled from configuration"
        );

        Ok(Self::new(
            QueryRefiner::new(refiner_llm),
            Retriever::new(embedder, store, config.store.collection.clone())
                .with_top_k(config.store.top_k),
            Synthesizer::new(synthesizer_llm),
            Reporter::new(reporter_llm),
        ))
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn stages(&self) -> [(StageName, &dyn StageAgent); 4] {
        [
            (StageName::RefineQuery, &self.refiner),
            (StageName::RetrieveData, &self.retriever),
            (StageName::SynthesizeData, &self.synthesizer),
            (StageName::GenerateReport, &self.reporter),
        ]
    }

    /// Run one query through every stage and return the final state.
    ///
    /// Dropping the returned future abandons any in-flight call.
    pub async fn run(&self, query: &str) -> Result<State, PipelineError> {
        let mut state = State::new(query);
        let started = Instant::now();
        debug!(run_id = %state.run_id, query, "Pipeline run started");

        for (stage, agent) in self.stages() {
            let span = info_span!(
                "stage",
                run_id = %state.run_id,
                stage = stage.as_str(),
                agent = agent.label()
            );
            self.observer.on_stage_start(stage).await;
            let stage_started = Instant::now();

            if let Err(source) = agent.execute(&mut state).instrument(span).await {
                warn!(stage = stage.as_str(), error = %source, "Stage failed");
                return Err(PipelineError::Stage { stage, source });
            }

            let elapsed_ms = stage_started.elapsed().as_millis() as u64;
            debug!(stage = stage.as_str(), elapsed_ms, "Stage complete");
            self.observer.on_stage_complete(stage, elapsed_ms).await;
        }

        info!(
            run_id = %state.run_id,
            chunks = state.retrieved_chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline run complete"
        );
        Ok(state)
    }

    /// Like [`run`](Self::run), but stops as soon as `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<State, PipelineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Pipeline run cancelled");
                Err(PipelineError::Cancelled)
            }
            result = self.run(query) => result,
        }
    }
}
