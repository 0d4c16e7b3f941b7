//! Report generation: turn the synthesis into a Markdown document.

use super::{StageAgent, ask, labels};
use crate::brain::LlmProvider;
use crate::error::LlmError;
use crate::state::{State, StateMetadata};
use crate::types::CompletionRequest;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const KEY_TAKEAWAYS: &str = "Key Takeaways";

pub const SYSTEM_PROMPT: &str = "You are a professional technical reporter. \
You turn raw research notes into clean Markdown reports without adding facts.";

pub struct Reporter {
    llm: Arc<dyn LlmProvider>,
}

impl Reporter {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub fn build_prompt(query: &str, synthesis: &str, metadata: &StateMetadata) -> String {
        let concepts = if metadata.key_concepts.is_empty() {
            String::new()
        } else {
            format!("Key Concepts: {}\n", metadata.key_concepts.join(", "))
        };
        format!(
            "User Query: {query}
{concepts}Raw Synthesis: {synthesis}

Format this into a clean, professional Markdown report:
1. Start with a \"{KEY_TAKEAWAYS}\" section summarizing the answer.
2. Follow with clearly headed sections.
3. Put any code mentioned in the synthesis in fenced code blocks.
Do not add facts that are not in the synthesis."
        )
    }

    /// A minimal summary-first report built directly from the synthesis.
    pub fn fallback_report(query: &str, synthesis: &str) -> String {
        let synthesis = synthesis.trim();
        let summary = synthesis
            .split("\n\n")
            .map(str::trim)
            .find(|p| !p.is_empty())
            .unwrap_or("No answer could be synthesized.");
        let mut report = format!("# {}\n\n## {KEY_TAKEAWAYS}\n\n- {summary}\n", query.trim());
        if !synthesis.is_empty() && synthesis != summary {
            report.push_str("\n## Details\n\n");
            report.push_str(synthesis);
            report.push('\n');
        }
        report
    }

    pub async fn generate_report(
        &self,
        query: &str,
        synthesis: &str,
        metadata: &StateMetadata,
    ) -> Result<String, LlmError> {
        let request =
            CompletionRequest::instructed(SYSTEM_PROMPT, Self::build_prompt(query, synthesis, metadata));
        let text = ask(self.llm.as_ref(), request).await?;
        if text.trim().is_empty() {
            warn!("Reporter model returned empty text, building report from synthesis");
            return Ok(Self::fallback_report(query, synthesis));
        }
        Ok(text)
    }
}

#[async_trait]
impl StageAgent for Reporter {
    fn label(&self) -> &'static str {
        labels::REPORTER
    }

    async fn execute(&self, state: &mut State) -> Result<(), LlmError> {
        let synthesis = state.synthesized_response.as_deref().unwrap_or("");
        let report = self
            .generate_report(state.query(), synthesis, &state.metadata)
            .await?;
        info!(chars = report.len(), "Report generated");
        state.final_report = Some(report);
        state
            .metadata
            .annotate("report_model", self.llm.model_name().into());
        state.hand_off(labels::REPORTER, labels::USER);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;

    #[test]
    fn test_prompt_contents() {
        let mut metadata = StateMetadata::default();
        metadata.add_key_concepts(["docling", "pdf"]);
        let prompt = Reporter::build_prompt("What is docling?", "Docling parses PDFs.", &metadata);
        assert!(prompt.contains("User Query: What is docling?"));
        assert!(prompt.contains("Key Concepts: docling, pdf"));
        assert!(prompt.contains("Raw Synthesis: Docling parses PDFs."));
        assert!(prompt.contains("\"Key Takeaways\""));
    }

    #[test]
    fn test_prompt_without_concepts() {
        let prompt = Reporter::build_prompt("q", "s", &StateMetadata::default());
        assert!(!prompt.contains("Key Concepts:"));
    }

    #[test]
    fn test_fallback_report_is_summary_first() {
        let report = Reporter::fallback_report(
            "What is docling?",
            "Docling is a parser.\n\nIt supports PDF and DOCX.",
        );
        assert!(report.starts_with("# What is docling?\n\n## Key Takeaways\n\n- Docling is a parser."));
        assert!(report.contains("## Details"));
        assert!(report.contains("It supports PDF and DOCX."));
    }

    #[test]
    fn test_fallback_report_empty_synthesis() {
        let report = Reporter::fallback_report("q", "   ");
        assert!(report.contains("No answer could be synthesized."));
        assert!(!report.contains("## Details"));
    }

    #[tokio::test]
    async fn test_execute_sets_report_and_provenance() {
        let mock = Arc::new(MockLlmProvider::with_response(
            "## Key Takeaways\n\n- Docling parses documents.",
        ));
        let reporter = Reporter::new(mock.clone());
        let mut state = State::new("What is docling?");
        state.synthesized_response = Some("Docling parses documents.".into());
        reporter.execute(&mut state).await.unwrap();

        assert!(state.final_report.as_deref().unwrap().starts_with("## Key Takeaways"));
        assert_eq!(state.sender, "reporter");
        assert_eq!(state.receiver, "user");
        assert_eq!(mock.requests()[0].system_text().as_deref(), Some(SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn test_blank_model_text_uses_fallback() {
        let reporter = Reporter::new(Arc::new(MockLlmProvider::with_response("")));
        let mut state = State::new("What is docling?");
        state.synthesized_response = Some("Docling parses documents.".into());
        reporter.execute(&mut state).await.unwrap();
        assert!(state.final_report.unwrap().contains("## Key Takeaways"));
    }
}
