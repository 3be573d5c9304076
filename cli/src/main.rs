//! Traverse CLI - host boundary for the analysis server runtime.
//!
//! Each subcommand maps to one host command: run an analysis (provisioning
//! a server on demand), toggle chunking, restart the server, or fetch the
//! latest server build. Analysis failures surface as notifications, never
//! as a crash of this process.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use traverse_config::Settings;
use traverse_engine::{Notifier, Orchestrator};
use traverse_provision::{ReleaseFeed, storage};
use traverse_types::AnalysisKind;

/// Release feed for prebuilt analysis server binaries.
const RELEASE_FEED_URL: &str = "https://api.github.com/repos/traverse-tools/traverse-server";

/// Traverse - program analysis diagrams for your workspace
#[derive(Parser, Debug)]
#[command(name = "traverse")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Answer yes to every prompt (e.g. server download consent)
    #[arg(long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Generate a call graph for the workspace
    CallGraph {
        #[arg(default_value = ".")]
        workspace: PathBuf,
    },

    /// Generate a sequence diagram for the workspace
    SequenceDiagram {
        #[arg(default_value = ".")]
        workspace: PathBuf,
    },

    /// Generate a storage access report for the workspace
    StorageAnalysis {
        #[arg(default_value = ".")]
        workspace: PathBuf,
    },

    /// Run all three analyses in sequence, tolerating individual failures
    All {
        #[arg(default_value = ".")]
        workspace: PathBuf,
    },

    /// Flip the output-chunking flag and persist it
    ToggleChunking,

    /// Stop and relaunch the analysis server
    RestartServer {
        #[arg(default_value = ".")]
        workspace: PathBuf,
    },

    /// Download (or refresh) the analysis server binary
    DownloadServer,
}

/// Prints notifications to the terminal and asks consent on stdin.
struct StdNotifier {
    auto_approve: bool,
}

impl Notifier for StdNotifier {
    fn info(&self, message: &str) {
        println!("{message}");
    }

    fn error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    fn confirm_download(&self) -> bool {
        if self.auto_approve {
            return true;
        }
        print!("Analysis server binary not found. Download the latest release? [y/N] ");
        let _ = std::io::stdout().flush();

        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_workspace(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path)
        .with_context(|| format!("resolving workspace path {}", path.display()))
}

fn build_orchestrator(settings: Settings, auto_approve: bool) -> Orchestrator {
    let feed = ReleaseFeed::new(RELEASE_FEED_URL, storage::default_storage_dir());
    Orchestrator::new(settings, feed, Box::new(StdNotifier { auto_approve }))
}

async fn run_analysis(
    orchestrator: &mut Orchestrator,
    kind: AnalysisKind,
    workspace: &Path,
) -> Result<()> {
    let root = resolve_workspace(workspace)?;
    orchestrator.execute(kind, &root).await;
    orchestrator.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config_path = traverse_config::default_config_path();

    if let Commands::ToggleChunking = cli.command {
        let settings = traverse_config::toggle_chunking(&config_path)
            .with_context(|| format!("updating settings at {}", config_path.display()))?;
        println!(
            "Output chunking is now {}",
            if settings.chunking { "enabled" } else { "disabled" }
        );
        return Ok(());
    }

    let settings = traverse_config::load(&config_path)
        .with_context(|| format!("loading settings from {}", config_path.display()))?;
    tracing::debug!(config = %config_path.display(), chunking = settings.chunking, "Loaded settings");
    let mut orchestrator = build_orchestrator(settings, cli.yes);

    match cli.command {
        Commands::CallGraph { workspace } => {
            run_analysis(&mut orchestrator, AnalysisKind::CallGraph, &workspace).await?;
        }
        Commands::SequenceDiagram { workspace } => {
            run_analysis(&mut orchestrator, AnalysisKind::SequenceDiagram, &workspace).await?;
        }
        Commands::StorageAnalysis { workspace } => {
            run_analysis(&mut orchestrator, AnalysisKind::StorageAnalysis, &workspace).await?;
        }
        Commands::All { workspace } => {
            let root = resolve_workspace(&workspace)?;
            orchestrator.execute_all(&root).await;
            orchestrator.shutdown().await;
        }
        Commands::RestartServer { workspace } => {
            let root = resolve_workspace(&workspace)?;
            if orchestrator.ensure_started(&root).await {
                orchestrator.restart_server().await;
            }
            orchestrator.shutdown().await;
        }
        Commands::DownloadServer => {
            orchestrator.download_server().await;
        }
        Commands::ToggleChunking => unreachable!("handled before orchestrator construction"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_analysis_commands_accept_a_workspace_path() {
        let cli = Cli::parse_from(["traverse", "call-graph", "/proj"]);
        match cli.command {
            Commands::CallGraph { workspace } => assert_eq!(workspace, PathBuf::from("/proj")),
            other => panic!("expected call-graph, got {other:?}"),
        }
    }

    #[test]
    fn test_workspace_defaults_to_current_dir() {
        let cli = Cli::parse_from(["traverse", "all"]);
        match cli.command {
            Commands::All { workspace } => assert_eq!(workspace, PathBuf::from(".")),
            other => panic!("expected all, got {other:?}"),
        }
    }

    #[test]
    fn test_yes_flag_is_global() {
        let cli = Cli::parse_from(["traverse", "download-server", "--yes"]);
        assert!(cli.yes);
        assert!(matches!(cli.command, Commands::DownloadServer));
    }
}
