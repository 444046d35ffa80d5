//! `ralph`: drive a coding-agent subprocess through a task loop against a
//! single git repository.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ralph_core::agent::{Harness, ProcessHarness};
use ralph_core::error::RalphError;
use ralph_core::fix;
use ralph_core::git::GitManager;
use ralph_core::gutter::GutterConfig;
use ralph_core::loop_engine::{LoopConfig, LoopEngine, LoopExit};
use ralph_core::record::RecordStore;
use ralph_core::state_dir::StateDir;
use ralph_core::task_store::{import_yaml, TaskStore};

#[derive(Debug, Parser)]
#[command(name = "ralph", about = "Agent-driven task loop over a git repository")]
struct Cli {
    /// Path to an explicit ralph.yaml; otherwise ./ralph.yaml, then the
    /// XDG config path, then defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the `.ralph/` workspace layout and a default `ralph.yaml`.
    Init,
    /// Run the loop until done, stalled, or cancelled.
    Run,
    /// Turn a PRD into a task YAML. Out of scope: prints guidance instead.
    Decompose {
        prd: PathBuf,
    },
    /// Import a task YAML into the task store.
    Import {
        tasks_yaml: PathBuf,
    },
    /// Operator corrections outside the loop.
    Fix {
        #[command(subcommand)]
        action: FixAction,
    },
    /// Create `.ralph/state/paused`.
    Pause,
    /// Remove `.ralph/state/paused`.
    Resume,
}

#[derive(Debug, Subcommand)]
enum FixAction {
    Retry {
        task_id: String,
        #[arg(long)]
        feedback: Option<String>,
    },
    Skip {
        task_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    Undo {
        iteration_id: String,
        /// Required: undo shows a confirmation payload and only applies it
        /// once the caller has agreed to it.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "ralph failed");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let repo_root = std::env::current_dir()?;

    match cli.command {
        Commands::Init => cmd_init(&repo_root, cli.config.as_deref()),
        Commands::Run => cmd_run(&repo_root, cli.config.as_deref()).await,
        Commands::Decompose { prd } => cmd_decompose(&prd),
        Commands::Import { tasks_yaml } => cmd_import(&repo_root, &tasks_yaml),
        Commands::Fix { action } => cmd_fix(&repo_root, action),
        Commands::Pause => cmd_pause(&repo_root),
        Commands::Resume => cmd_resume(&repo_root),
    }
}

fn cmd_init(repo_root: &std::path::Path, config_path: Option<&std::path::Path>) -> anyhow::Result<ExitCode> {
    let state_dir = StateDir::new(repo_root);
    state_dir.init()?;

    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| repo_root.join("ralph.yaml"));
    if !path.exists() {
        let default = config::RalphConfig::default();
        let yaml = serde_yaml::to_string(&default)?;
        std::fs::write(&path, yaml)?;
        info!(path = %path.display(), "wrote default ralph.yaml");
    }

    println!("initialized .ralph/ at {}", state_dir.root().display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(repo_root: &std::path::Path, config_path: Option<&std::path::Path>) -> anyhow::Result<ExitCode> {
    let config = config::resolve(config_path)?;

    let state_dir = StateDir::new(repo_root);
    state_dir.assert_initialized()?;

    let task_store = TaskStore::new(state_dir.tasks_dir());
    let record_store = RecordStore::new(state_dir.logs_dir());
    let git = GitManager::new(repo_root)?;

    let (command, args) = config
        .agent
        .command
        .split_first()
        .map(|(cmd, rest)| (cmd.clone(), [rest, config.agent.args.as_slice()].concat()))
        .ok_or_else(|| anyhow::anyhow!("agent.command must not be empty"))?;
    let harness: Box<dyn Harness> = Box::new(ProcessHarness::new("agent", command, args));

    let loop_config = LoopConfig {
        max_iterations: config.loop_.max_iterations,
        max_minutes_per_iteration: config.loop_.max_minutes_per_iteration,
        max_verification_retries: config.loop_.max_verification_retries,
    };

    let gutter_config = GutterConfig {
        max_same_failure: config.gutter.max_same_failure,
        max_churn_iterations: config.gutter.max_churn_iterations,
        churn_threshold: config.gutter.churn_threshold,
        max_churn_commits: config.gutter.max_churn_commits,
        max_oscillations: config.gutter.max_oscillations,
        enable_content_hash: config.gutter.enable_content_hash,
    };

    let engine = LoopEngine::new(
        repo_root.to_path_buf(),
        task_store,
        state_dir,
        record_store,
        git,
        harness,
        loop_config,
        gutter_config,
    );

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let exit = engine.run(&cancel).await?;
    match exit {
        LoopExit::Done => {
            println!("done");
            Ok(ExitCode::SUCCESS)
        }
        LoopExit::Stalled => {
            println!("stalled: no selectable task remains but not all tasks are completed");
            Ok(ExitCode::from(3))
        }
        LoopExit::MaxIterationsReached => {
            println!("stopped: max_iterations reached");
            Ok(ExitCode::from(2))
        }
        LoopExit::Cancelled => {
            println!("cancelled");
            Ok(ExitCode::from(130))
        }
    }
}

fn cmd_decompose(_prd: &std::path::Path) -> anyhow::Result<ExitCode> {
    eprintln!(
        "decompose is not implemented: turning a PRD into tasks is outside this tool's scope.\n\
         Produce a task YAML by hand (or with whatever LLM tooling you prefer) and run\n\
         `ralph import <tasks.yaml>` instead."
    );
    Ok(ExitCode::from(1))
}

fn cmd_import(repo_root: &std::path::Path, tasks_yaml: &std::path::Path) -> anyhow::Result<ExitCode> {
    let state_dir = StateDir::new(repo_root);
    state_dir.assert_initialized()?;
    let task_store = TaskStore::new(state_dir.tasks_dir());

    let yaml = std::fs::read_to_string(tasks_yaml)?;
    let report = import_yaml(&task_store, &yaml)?;

    for err in &report.errors {
        eprintln!("error: {err}");
    }
    println!("imported {} task(s)", report.imported.len());

    if report.imported.is_empty() && !report.errors.is_empty() {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn cmd_fix(repo_root: &std::path::Path, action: FixAction) -> anyhow::Result<ExitCode> {
    let state_dir = StateDir::new(repo_root);
    state_dir.assert_initialized()?;
    let task_store = TaskStore::new(state_dir.tasks_dir());
    let record_store = RecordStore::new(state_dir.logs_dir());
    let git = GitManager::new(repo_root)?;

    match action {
        FixAction::Retry { task_id, feedback } => {
            fix::retry(&task_store, &state_dir, &task_id, feedback.as_deref())
                .map_err(RalphError::from)?;
            println!("{task_id}: reopened for retry");
        }
        FixAction::Skip { task_id, reason } => {
            fix::skip(&task_store, &state_dir, &task_id, reason.as_deref())
                .map_err(RalphError::from)?;
            println!("{task_id}: skipped");
        }
        FixAction::Undo { iteration_id, yes } => {
            let confirmation = fix::prepare_undo(&record_store, &git, &iteration_id)
                .map_err(RalphError::from)?;
            println!(
                "undo {} will reset to {} and discard: {:?}",
                confirmation.iteration_id, confirmation.base_commit, confirmation.files_to_revert
            );
            if confirmation.has_uncommitted_changes {
                println!("warning: working tree has uncommitted changes that will be discarded");
            }
            if !yes {
                println!("pass --yes to apply this undo");
                return Ok(ExitCode::from(1));
            }
            fix::confirm_undo(&task_store, &record_store, &git, &confirmation)
                .map_err(RalphError::from)?;
            println!("{}: undone", confirmation.iteration_id);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_pause(repo_root: &std::path::Path) -> anyhow::Result<ExitCode> {
    let state_dir = StateDir::new(repo_root);
    state_dir.assert_initialized()?;
    state_dir.pause()?;
    println!("paused");
    Ok(ExitCode::SUCCESS)
}

fn cmd_resume(repo_root: &std::path::Path) -> anyhow::Result<ExitCode> {
    let state_dir = StateDir::new(repo_root);
    state_dir.assert_initialized()?;
    state_dir.resume()?;
    println!("resumed");
    Ok(ExitCode::SUCCESS)
}
