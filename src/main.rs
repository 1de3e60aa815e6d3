use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use story_orchestrator::config::{config, OrchestratorConfig};
use story_orchestrator::state::{
    create_initial_state, diff_graph_state, safe_deserialize_state, serialize_state_pretty,
    GraphState, InitialStateParams, StateSerdeError,
};
use story_orchestrator::story::{is_valid_transition, StoryState};
use story_orchestrator::telemetry::{init_telemetry, shutdown_telemetry};

#[derive(Parser)]
#[command(name = "storyflow")]
#[command(about = "Inspect and validate story workflow state documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh state document for a story
    Init {
        /// Epic prefix, e.g. wrkf
        prefix: String,
        /// Story id, e.g. wrkf-1010
        story_id: String,
        /// Write the document to this file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Validate a state document on disk
    Validate {
        file: PathBuf,
    },
    /// Show the structural diff between two state documents
    Diff {
        before: PathBuf,
        after: PathBuf,
    },
    /// Show the happy-path successor of a story state and what to do next
    Next {
        state: StoryState,
    },
    /// Check whether a story may move from one state to another
    Check {
        from: StoryState,
        to: StoryState,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = OrchestratorConfig::load_env_file();
    let config = config()?;
    init_telemetry(&config.observability)?;

    let result = match cli.command {
        Commands::Init {
            prefix,
            story_id,
            output,
        } => tokio::runtime::Runtime::new()?
            .block_on(async { init_command(config, prefix, story_id, output).await }),
        Commands::Validate { file } => {
            tokio::runtime::Runtime::new()?.block_on(async { validate_command(&file).await })
        }
        Commands::Diff { before, after } => tokio::runtime::Runtime::new()?
            .block_on(async { diff_command(&before, &after).await }),
        Commands::Next { state } => next_command(state),
        Commands::Check { from, to } => check_command(from, to),
    };

    shutdown_telemetry();
    result
}

async fn init_command(
    config: &OrchestratorConfig,
    prefix: String,
    story_id: String,
    output: Option<PathBuf>,
) -> Result<()> {
    let params = InitialStateParams::new(prefix, story_id)
        .with_schema_version(config.state.schema_version.clone());
    let state = create_initial_state(params)?;
    let json = serialize_state_pretty(&state)?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, format!("{json}\n"))
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✅ Wrote initial state for {} to {}", state.story_id, path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn validate_command(file: &Path) -> Result<()> {
    match read_state(file).await? {
        Ok(state) => {
            println!(
                "✅ {} is valid (story {}, schema {}, {} history entries)",
                file.display(),
                state.story_id,
                state.schema_version,
                state.state_history.len()
            );
            Ok(())
        }
        Err(StateSerdeError::Schema(err)) => {
            println!("❌ {} failed validation:", file.display());
            for issue in &err.issues {
                println!("   • {issue}");
            }
            bail!("{} issue(s) found", err.issues.len())
        }
        Err(err) => bail!("❌ {}: {err}", file.display()),
    }
}

async fn diff_command(before: &Path, after: &Path) -> Result<()> {
    let before_state = read_state(before).await??;
    let after_state = read_state(after).await??;

    let diff = diff_graph_state(&before_state, &after_state);
    println!("{}", serde_json::to_string_pretty(&diff)?);
    Ok(())
}

fn next_command(state: StoryState) -> Result<()> {
    match state.next() {
        Some(next) => println!("{state} → {next}"),
        None => println!("{state} is terminal"),
    }
    println!("Next action: {}", state.next_action());
    Ok(())
}

fn check_command(from: StoryState, to: StoryState) -> Result<()> {
    if is_valid_transition(from, to) {
        println!("✅ {from} → {to} is allowed");
        Ok(())
    } else {
        bail!("❌ {from} → {to} is not allowed")
    }
}

async fn read_state(path: &Path) -> Result<Result<GraphState, StateSerdeError>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(safe_deserialize_state(bytes))
}
