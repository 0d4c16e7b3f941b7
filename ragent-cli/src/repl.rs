//! Single-query and interactive modes.

use crate::OutputOptions;
use ragent_core::{Orchestrator, PipelineError, PipelineObserver, RagentConfig, StageName, State};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Prints stage progress to stderr so stdout stays clean for the report.
pub(crate) struct CliObserver;

#[async_trait::async_trait]
impl PipelineObserver for CliObserver {
    async fn on_stage_start(&self, stage: StageName) {
        eprintln!("\x1b[36m  [{}] running...\x1b[0m", stage);
    }

    async fn on_stage_complete(&self, stage: StageName, elapsed_ms: u64) {
        eprintln!("\x1b[36m  [{}] done in {}ms\x1b[0m", stage, elapsed_ms);
    }
}

pub fn build_orchestrator(
    config: &RagentConfig,
    output: OutputOptions,
) -> anyhow::Result<Orchestrator> {
    let orchestrator = Orchestrator::from_config(config)?;
    if output.quiet || output.json {
        Ok(orchestrator)
    } else {
        Ok(orchestrator.with_observer(Arc::new(CliObserver)))
    }
}

/// Exit status of a single query interrupted with Ctrl-C.
pub(crate) const CANCELLED_STATUS: u8 = 130;

/// A token that fires on Ctrl-C, and the task watching for it.
fn cancel_on_ctrl_c() -> (CancellationToken, JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    (cancel, watcher)
}

/// Run one query, cancelling it on Ctrl-C.
async fn answer(orchestrator: &Orchestrator, query: &str) -> Result<State, PipelineError> {
    let (cancel, watcher) = cancel_on_ctrl_c();
    let result = orchestrator.run_with_cancel(query, cancel).await;
    watcher.abort();
    result
}

const RULE: &str = "────────────────────────────────────────────────────────────";

/// Render a finished run for stdout.
pub(crate) fn render(state: &State, output: OutputOptions, elapsed: Duration) -> anyhow::Result<String> {
    if output.json {
        return Ok(serde_json::to_string_pretty(state)?);
    }

    let mut out = String::new();
    if !output.quiet {
        if let Some(refined) = state.refined_query.as_deref()
            && refined != state.query()
        {
            out.push_str(&format!("→ {refined}\n"));
        }
        out.push_str(&format!(
            "→ Found {} relevant chunks\n\n",
            state.retrieved_chunks.len()
        ));
    }
    if output.show_chunks {
        out.push_str(&render_chunks(state));
    }
    out.push_str(state.final_report.as_deref().unwrap_or_default());
    if !output.quiet {
        out.push_str(&render_footer(state, elapsed));
    }
    Ok(out)
}

/// Query analysis and timing, printed under the report.
fn render_footer(state: &State, elapsed: Duration) -> String {
    let mut out = format!("\n\n{RULE}\n");
    out.push_str(&format!(
        "Query Intent: {}\n",
        state.query_intent.as_deref().unwrap_or("N/A")
    ));
    out.push_str(&format!(
        "Complexity: {}\n",
        state.query_complexity.as_deref().unwrap_or("N/A")
    ));
    if !state.metadata.key_concepts.is_empty() {
        out.push_str(&format!(
            "Key Concepts: {}\n",
            state.metadata.key_concepts.join(", ")
        ));
    }
    out.push_str(&format!("{RULE}\n"));
    out.push_str(&format!("Processing time: {:.2}s", elapsed.as_secs_f64()));
    out
}

fn render_chunks(state: &State) -> String {
    if state.retrieved_chunks.is_empty() {
        return "(no chunks retrieved)\n\n".to_string();
    }

    let mut out = String::new();
    for (i, chunk) in state.retrieved_chunks.iter().enumerate() {
        let source = chunk.source().unwrap_or("unknown source");
        out.push_str(&format!(
            "[{}] id={} score={:.3} ({})\n",
            i, chunk.id, chunk.score, source
        ));
        if let Some(content) = chunk.content() {
            let preview: String = content.chars().take(200).collect();
            let ellipsis = if content.chars().count() > 200 { "..." } else { "" };
            out.push_str(&format!("    {}{}\n", preview, ellipsis));
        }
    }
    out.push('\n');
    out
}

/// Run a single query. A cancelled run exits with [`CANCELLED_STATUS`].
///
/// The status is returned rather than exiting here so `main` can unwind and
/// flush the file log.
pub async fn run_single_query(
    orchestrator: &Orchestrator,
    query: &str,
    output: OutputOptions,
) -> anyhow::Result<ExitCode> {
    let (cancel, watcher) = cancel_on_ctrl_c();
    let status = single_query(orchestrator, query, output, cancel).await;
    watcher.abort();
    Ok(ExitCode::from(status?))
}

async fn single_query(
    orchestrator: &Orchestrator,
    query: &str,
    output: OutputOptions,
    cancel: CancellationToken,
) -> anyhow::Result<u8> {
    let started = Instant::now();
    match orchestrator.run_with_cancel(query, cancel).await {
        Ok(state) => {
            println!("{}", render(&state, output, started.elapsed())?);
            Ok(0)
        }
        Err(PipelineError::Cancelled) => {
            eprintln!("Cancelled.");
            Ok(CANCELLED_STATUS)
        }
        Err(e) => Err(e.into()),
    }
}

/// Read queries from stdin until EOF or `/quit`.
pub async fn run_interactive(
    orchestrator: &Orchestrator,
    output: OutputOptions,
) -> anyhow::Result<ExitCode> {
    if !output.quiet {
        println!("\x1b[1;36mRagent\x1b[0m - ask a question about your documents");
        println!("  Ctrl-C cancels a running query, /quit exits\n");
    }

    let stdin = io::stdin();
    loop {
        print!("\x1b[1;34m> \x1b[0m");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "/quit" | "/exit" | "/q" | "exit" | "quit") {
            println!("Goodbye!");
            break;
        }

        let started = Instant::now();
        match answer(orchestrator, input).await {
            Ok(state) => println!("\n{}\n", render(&state, output, started.elapsed())?),
            Err(PipelineError::Cancelled) => eprintln!("\x1b[33mCancelled.\x1b[0m"),
            Err(e) => eprintln!("\x1b[31mError:\x1b[0m {}", e),
        }
    }

    Ok(ExitCode::SUCCESS)
}
