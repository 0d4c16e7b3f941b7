//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use ragent_core::RagentConfig;
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config: &RagentConfig,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, config),
    }
}

fn handle_config(action: ConfigAction, workspace: &Path, config: &RagentConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => init_config(workspace),
        ConfigAction::Show => {
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Write the default configuration to `.ragent/config.toml`, leaving an
/// existing file untouched.
pub fn init_config(workspace: &Path) -> anyhow::Result<()> {
    match write_default_config(workspace)? {
        Some(path) => println!("Created default configuration at: {}", path.display()),
        None => println!(
            "Configuration file already exists at: {}",
            config_path(workspace).display()
        ),
    }
    Ok(())
}

fn config_path(workspace: &Path) -> PathBuf {
    workspace.join(".ragent").join("config.toml")
}

fn write_default_config(workspace: &Path) -> anyhow::Result<Option<PathBuf>> {
    let path = config_path(workspace);
    if path.exists() {
        return Ok(None);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, RagentConfig::default().to_toml()?)?;
    Ok(Some(path))
}
