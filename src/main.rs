use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pipewright::config::Config;
use pipewright::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(version, about = "Inspect and repair durable pipeline runs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// SQLite database path. Overrides pipewright.toml and PIPEWRIGHT_DB.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List a thread's checkpoints, newest first
    Checkpoints {
        thread: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show the latest checkpoint of a thread
    Status { thread: String },
    /// Show how a thread would resume after a crash
    Recover {
        thread: String,
        /// Also flag this project's in-progress task rows as resumed
        #[arg(long)]
        project: Option<i64>,
    },
    /// Delete business rows written after a checkpoint
    Rollback { project: i64, checkpoint: String },
    /// Check a JSON task list for dependency cycles and phase-order violations
    ValidateDag { file: PathBuf },
    /// Delete every checkpoint and pending write of a thread
    Purge {
        thread: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default pipewright.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::with_cli_args(project_dir, cli.db.clone(), cli.verbose)?;
    let _log_guard = logging::init_tracing(&config)?;

    match &cli.command {
        Commands::Checkpoints { thread, limit } => {
            cmd::cmd_checkpoints(&config, thread, *limit, cli.json)?
        }
        Commands::Status { thread } => cmd::cmd_status(&config, thread, cli.json)?,
        Commands::Recover { thread, project } => {
            cmd::cmd_recover(&config, thread, *project, cli.json)?
        }
        Commands::Rollback {
            project,
            checkpoint,
        } => cmd::cmd_rollback(&config, *project, checkpoint, cli.json)?,
        Commands::ValidateDag { file } => cmd::cmd_validate_dag(file, cli.json)?,
        Commands::Purge { thread, force } => cmd::cmd_purge(&config, thread, *force)?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
