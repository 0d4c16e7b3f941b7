//! Ragent CLI: terminal interface for the ragent answering pipeline.
//!
//! Provides both single-query and interactive modes.

mod commands;
mod repl;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Ragent: answer questions from your document store
#[derive(Parser, Debug)]
#[command(name = "ragent", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Question to answer (starts interactive mode if omitted)
    query: Option<String>,

    /// Workspace directory (reads .ragent/config.toml from here)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the whole pipeline state as JSON instead of the report
    #[arg(long)]
    json: bool,

    /// Print the retrieved chunks before the report
    #[arg(long)]
    show_chunks: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug, PartialEq)]
pub(crate) enum Commands {
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug, PartialEq)]
pub(crate) enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Print the effective configuration as TOML
    Show,
}

/// Output options shared by single-query and interactive modes.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct OutputOptions {
    pub json: bool,
    pub show_chunks: bool,
    pub quiet: bool,
}

fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = log_filter(cli.verbose, cli.quiet);

    // RUST_LOG wins over the verbosity flags when set
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    let log_dir = directories::ProjectDirs::from("dev", "ragent", "ragent")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ragent.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    // `config init` must work even when the existing config is broken
    if let Some(Commands::Config {
        action: ConfigAction::Init,
    }) = cli.command
    {
        commands::init_config(&workspace)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = ragent_core::config::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    tracing::debug!(workspace = %workspace.display(), "Configuration loaded");

    if let Some(command) = cli.command {
        commands::handle_command(command, &workspace, &config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let output = OutputOptions {
        json: cli.json,
        show_chunks: cli.show_chunks,
        quiet: cli.quiet,
    };

    let orchestrator = repl::build_orchestrator(&config, output)?;
    match cli.query {
        Some(query) => repl::run_single_query(&orchestrator, &query, output).await,
        None => repl::run_interactive(&orchestrator, output).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_query() {
        let cli = Cli::try_parse_from(["ragent", "What is docling?", "--show-chunks"]).unwrap();
        assert_eq!(cli.query.as_deref(), Some("What is docling?"));
        assert!(cli.show_chunks);
        assert!(!cli.json);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["ragent", "config", "show"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Show
            })
        );
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from(["ragent", "-vv", "--json", "--config", "rag.toml"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("rag.toml")));
        assert!(cli.query.is_none());
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter(0, true), "error");
        assert_eq!(log_filter(0, false), "warn");
        assert_eq!(log_filter(1, false), "info");
        assert_eq!(log_filter(5, false), "trace");
    }
}
