//! Registry edits: add, remove, scan, set-path.

use std::path::Path;

use anyhow::{Context, Result};

use devsync_core::config::OsType;
use devsync_core::workspace;

use crate::style;
use crate::{AppContext, Completion};

/// Track the repository at `path`.
pub fn run_add(ctx: &mut AppContext, path: &Path) -> Result<Completion> {
    let base = ctx.base_path();
    let repo = workspace::track_repo(&mut ctx.config, path, &base)
        .with_context(|| format!("cannot add {}", path.display()))?;
    ctx.save()?;

    if repo.remote_url.is_empty() {
        println!("{}", style::warn("No 'origin' remote found; other machines cannot clone it"));
    }
    println!("{}", style::success(&format!("Added repository: {}", repo.name)));
    Ok(Completion::Done)
}

/// Stop tracking `name`.
pub fn run_remove(ctx: &mut AppContext, name: &str) -> Result<Completion> {
    ctx.config.remove_repo(name)?;
    ctx.save()?;
    println!("{}", style::success(&format!("Removed repository: {}", name)));
    Ok(Completion::Done)
}

/// Track every repository found under `path` (default: base path).
pub fn run_scan(ctx: &mut AppContext, path: Option<&Path>) -> Result<Completion> {
    let base = ctx.base_path();
    let scan_path = path.map(Path::to_path_buf).unwrap_or_else(|| base.clone());

    style::banner(&format!("Scanning {}", scan_path.display()));
    let found = workspace::scan_for_repos(&scan_path)
        .with_context(|| format!("failed to scan {}", scan_path.display()))?;

    let mut added = 0usize;
    for repo_path in &found {
        match workspace::track_repo(&mut ctx.config, repo_path, &base) {
            Ok(repo) => {
                println!("  {}", style::success(&repo.name));
                added += 1;
            }
            Err(e) => println!("  {}", style::error(&format!("{}: {}", repo_path.display(), e))),
        }
    }

    if added > 0 {
        ctx.save()?;
    }
    println!();
    println!("Added {} repositories", added);
    Ok(Completion::Done)
}

/// Set the base path for `os`.
pub fn run_set_path(ctx: &mut AppContext, os: &str, path: &str) -> Result<Completion> {
    let os: OsType = os.parse()?;
    ctx.config.set_base_path(os, path);
    ctx.save()?;
    println!("{}", style::success(&format!("Set {} base path to: {}", os, path)));
    Ok(Completion::Done)
}
