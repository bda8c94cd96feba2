//! `dev`: personal cross-machine development workflow tool.
//!
//! Tracks git repositories in a shared registry so every machine can clone
//! the same set, and keeps agent-instructions documents synchronized between
//! each workspace and the shared config repository.

mod instructions;
mod repo;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use devsync_core::config::{self, OsType, RepoConfig, CONFIG_DIR_ENV};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Development workflow tool.
#[derive(Parser, Debug)]
#[command(
    name = "dev",
    version,
    about = "Track repositories and sync agent instructions across machines"
)]
struct Cli {
    /// Config directory holding repos.json and the canonical instructions.
    #[arg(long, global = true, env = CONFIG_DIR_ENV)]
    config_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage tracked repositories.
    Repo {
        #[command(subcommand)]
        action: repo::RepoCommands,
    },

    /// Synchronize agent instructions documents.
    Instructions {
        #[command(subcommand)]
        action: instructions::InstructionsCommands,
    },
}

/// How a command finished, when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    /// Something needs the user's attention (e.g. a blocked document).
    NeedsAttention,
}

/// Resolved per-invocation context shared by all subcommands.
#[derive(Debug)]
pub struct AppContext {
    pub config_dir: PathBuf,
    pub config: RepoConfig,
}

impl AppContext {
    fn load(config_dir: Option<&Path>) -> Result<Self> {
        let config_dir =
            config::resolve_config_dir(config_dir).context("failed to resolve config directory")?;
        let config = RepoConfig::load_or_init(&config_dir).with_context(|| {
            format!("failed to load registry from {}", config_dir.display())
        })?;
        Ok(Self { config_dir, config })
    }

    /// Workspace base path on this machine.
    pub fn base_path(&self) -> PathBuf {
        self.config.base_path(OsType::current())
    }

    pub fn save(&self) -> Result<()> {
        self.config
            .save(&self.config_dir)
            .context("failed to save registry")
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(Completion::Done) => ExitCode::SUCCESS,
        Ok(Completion::NeedsAttention) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<Completion> {
    let mut ctx = AppContext::load(cli.config_dir.as_deref())?;
    match cli.command {
        Commands::Repo { action } => repo::run_repo(action, &mut ctx),
        Commands::Instructions { action } => instructions::run_instructions(action, &ctx),
    }
}
