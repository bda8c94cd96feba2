//! `dev repo` subcommands.
//!
//! add, remove, list, status, scan, set-path, sync.

pub mod manage;
pub mod status;
pub mod sync;

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use crate::{AppContext, Completion};

/// Repository tracking subcommands.
#[derive(Subcommand, Debug)]
pub enum RepoCommands {
    /// Add a repository to tracking.
    Add {
        /// Path to the repository.
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Remove a repository from tracking.
    Remove {
        /// Name of the repository (as shown by `dev repo list`).
        name: String,
    },

    /// List all tracked repositories.
    List,

    /// Show which tracked repositories exist on this machine.
    Status,

    /// Scan a directory and add every git repository in it.
    Scan {
        /// Directory to scan (defaults to this machine's base path).
        path: Option<PathBuf>,
    },

    /// Set the workspace base path for an OS.
    SetPath {
        /// linux, darwin, or windows.
        os: String,
        /// Base path.
        path: String,
    },

    /// Sync the config repo and instructions, clone missing repositories,
    /// and check for stale branches.
    Sync {
        /// Switch stale branches to the default branch without asking.
        #[arg(short, long)]
        yes: bool,

        /// Skip the stale-branch check.
        #[arg(long)]
        no_stale_check: bool,
    },
}

/// Run a repo subcommand.
pub fn run_repo(cmd: RepoCommands, ctx: &mut AppContext) -> Result<Completion> {
    match cmd {
        RepoCommands::Add { path } => manage::run_add(ctx, &path),
        RepoCommands::Remove { name } => manage::run_remove(ctx, &name),
        RepoCommands::List => status::run_list(ctx),
        RepoCommands::Status => status::run_status(ctx),
        RepoCommands::Scan { path } => manage::run_scan(ctx, path.as_deref()),
        RepoCommands::SetPath { os, path } => manage::run_set_path(ctx, &os, &path),
        RepoCommands::Sync {
            yes,
            no_stale_check,
        } => sync::run_sync(
            ctx,
            sync::SyncOptions {
                assume_yes: yes,
                stale_check: !no_stale_check,
            },
        ),
    }
}
