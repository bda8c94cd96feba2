//! `dev repo sync`: config repo cycle, missing clones, stale branches.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use devsync_core::config::TrackedRepo;
use devsync_core::errors::GitError;
use devsync_core::git::{GitClient, PullOutcome};
use devsync_core::{run_cycle, CycleReport};

use crate::style;
use crate::{AppContext, Completion};

const REMOTE: &str = "origin";

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub assume_yes: bool,
    pub stale_check: bool,
}

/// What happened to one tracked repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepoOutcome {
    Cloned,
    Skipped,
    Failed,
}

pub fn run_sync(ctx: &mut AppContext, opts: SyncOptions) -> Result<Completion> {
    let base = ctx.base_path();

    style::banner("Config Repository");
    let report = run_cycle(&ctx.config, &ctx.config_dir, &base)
        .context("instructions sync failed")?;
    print_cycle(&report);

    // A pull may have brought in registry changes from another machine.
    let reloaded = devsync_core::RepoConfig::load_or_init(&ctx.config_dir)
        .context("failed to reload registry after pull")?;
    ctx.config = reloaded;

    style::banner("Repositories");
    println!("  Base path  {}", base.display());
    println!();

    let mut synced = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    let stale_days = ctx.config.sync.stale_branch_days;

    for repo in &ctx.config.repos {
        let target = repo.target_path(&base);
        match sync_repo(repo, &target) {
            RepoOutcome::Cloned => synced += 1,
            RepoOutcome::Skipped => {
                skipped += 1;
                if opts.stale_check {
                    if let Err(e) = check_stale_branch(repo, &target, stale_days, opts.assume_yes) {
                        println!("  {}", style::warn(&format!("{}: {:#}", repo.name, e)));
                    }
                }
            }
            RepoOutcome::Failed => failed += 1,
        }
    }

    println!();
    println!("Synced: {} | Skipped: {} | Failed: {}", synced, skipped, failed);
    println!();

    let git_failed = !matches!(
        report.git_error,
        None | Some(GitError::RepositoryNotFound(_))
    );
    if failed > 0 || report.has_blocked() || git_failed {
        Ok(Completion::NeedsAttention)
    } else {
        Ok(Completion::Done)
    }
}

fn print_cycle(report: &CycleReport) {
    for r in &report.captured {
        println!("  {}", style::sync_line("capture", &r.doc.name(), &r.status));
    }

    if let Some(oid) = report.commit {
        let sha = oid.to_string();
        println!("  {}", style::success(&format!("committed {}", &sha[..sha.len().min(8)])));
    }
    match &report.pull {
        Some(PullOutcome::UpToDate) => println!("  {}", style::success("pull: up to date")),
        Some(PullOutcome::FastForward) => println!("  {}", style::success("pull: fast-forwarded")),
        Some(PullOutcome::Merged(_)) => {
            println!("  {}", style::success("pull: merged remote changes"))
        }
        Some(PullOutcome::NoUpstream) => {
            println!("  {}", style::dim("pull: no remote configured"))
        }
        None => {}
    }
    for r in &report.pulled {
        println!("  {}", style::sync_line("merge", &r.doc.name(), &r.status));
    }
    if report.pushed {
        println!("  {}", style::success("pushed"));
    }

    match &report.git_error {
        Some(GitError::RepositoryNotFound(path)) => println!(
            "  {}",
            style::warn(&format!("{} is not a git repository; skipping commit/pull/push", path))
        ),
        Some(GitError::MergeConflict(paths)) => {
            println!(
                "  {}",
                style::error(&format!("pull would conflict in: {}", paths.join(", ")))
            );
            println!(
                "    {}",
                style::dim("Resolve manually in the config directory with git, then rerun sync.")
            );
        }
        Some(e) => println!("  {}", style::error(&format!("git: {}", e))),
        None => {}
    }

    for r in &report.applied {
        println!("  {}", style::sync_line("apply", &r.doc.name(), &r.status));
    }
}

fn sync_repo(repo: &TrackedRepo, target: &Path) -> RepoOutcome {
    if target.exists() {
        debug!(repo = %repo.name, path = %target.display(), "already present");
        println!("  {}", style::dim(&format!("{} (exists)", repo.name)));
        return RepoOutcome::Skipped;
    }

    if repo.remote_url.is_empty() {
        println!(
            "  {}",
            style::error(&format!("{}: no remote URL recorded", repo.name))
        );
        return RepoOutcome::Failed;
    }

    if let Some(parent) = target.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            println!(
                "  {}",
                style::error(&format!("{}: cannot create {}: {}", repo.name, parent.display(), e))
            );
            return RepoOutcome::Failed;
        }
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message(format!("Cloning {}...", repo.name));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = GitClient::clone_repo(&repo.remote_url, target);
    spinner.finish_and_clear();

    match result {
        Ok(_) => {
            println!("  {}", style::success(&format!("{} (cloned)", repo.name)));
            RepoOutcome::Cloned
        }
        Err(e) => {
            warn!(repo = %repo.name, error = %e, "clone failed");
            println!("  {}", style::error(&format!("{}: {}", repo.name, e)));
            RepoOutcome::Failed
        }
    }
}

/// Offer to move a repository that sits on an old non-default branch back
/// to the remote default branch.
fn check_stale_branch(
    repo: &TrackedRepo,
    target: &Path,
    stale_days: u64,
    assume_yes: bool,
) -> Result<()> {
    let client = GitClient::open(target)?;
    let Some(current) = client.current_branch() else {
        return Ok(());
    };
    let Some(default) = client.default_branch(REMOTE) else {
        return Ok(());
    };
    if current == default {
        return Ok(());
    }

    let age = client.head_age_days()?;
    if age < i64::try_from(stale_days).unwrap_or(i64::MAX) {
        return Ok(());
    }

    println!(
        "    {}",
        style::warn(&format!(
            "'{}' last committed {} days ago (not on '{}')",
            current, age, default
        ))
    );

    let switch = if assume_yes {
        true
    } else {
        match Confirm::new()
            .with_prompt(format!("Switch {} to '{}'?", repo.name, default))
            .default(true)
            .interact()
        {
            Ok(answer) => answer,
            Err(e) => {
                debug!(error = %e, "no terminal for prompt");
                println!("    {}", style::dim("not a terminal; leaving branch as is"));
                false
            }
        }
    };

    if switch {
        client
            .switch_to_remote_branch(REMOTE, &default)
            .with_context(|| format!("failed to switch to '{}'", default))?;
        println!("    {}", style::success(&format!("switched to '{}'", default)));
    }
    Ok(())
}
