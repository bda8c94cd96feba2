//! `dev instructions` subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use devsync_core::config::{InstructionsDoc, RepoConfig};
use devsync_core::config_repo::{coordinator, ConfigRepo};
use devsync_core::conflict::ConflictDetector;
use devsync_core::{Document, InstructionsSync, PairState};

use crate::style;
use crate::{AppContext, Completion};

#[derive(Subcommand, Debug)]
pub enum InstructionsCommands {
    /// Compare canonical and workspace copies of every document.
    Status,

    /// Merge workspace edits into the canonical copies (no git).
    Capture,

    /// Overwrite workspace copies from the canonical copies (no git).
    Apply,

    /// Report unresolved conflict markers in either copy.
    Check,
}

pub fn run_instructions(cmd: InstructionsCommands, ctx: &AppContext) -> Result<Completion> {
    match cmd {
        InstructionsCommands::Status => run_status(ctx),
        InstructionsCommands::Capture => run_direction(ctx, Direction::Capture),
        InstructionsCommands::Apply => run_direction(ctx, Direction::Apply),
        InstructionsCommands::Check => run_check(ctx),
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Capture,
    Apply,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Capture => "capture",
            Direction::Apply => "apply",
        }
    }
}

fn syncs(ctx: &AppContext) -> Vec<(InstructionsDoc, InstructionsSync)> {
    let base = ctx.base_path();
    let repo = ConfigRepo::open(&ctx.config_dir).ok();
    ctx.config
        .instructions
        .iter()
        .map(|doc| {
            let sync = coordinator(&ctx.config, doc, &ctx.config_dir, &base, repo.as_ref());
            (doc.clone(), sync)
        })
        .collect()
}

fn run_status(ctx: &AppContext) -> Result<Completion> {
    style::banner("Instructions");
    println!("  Capture policy  {}", ctx.config.sync.capture_policy);
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Document", "Canonical", "Workspace", "State"]);

    let mut attention = false;
    for (doc, sync) in syncs(ctx) {
        let state = sync
            .state()
            .with_context(|| format!("failed to read {}", doc.name()))?;
        if matches!(state, PairState::Conflicted(_)) {
            attention = true;
        }
        table.add_row(vec![
            Cell::new(doc.name()),
            Cell::new(sync.canonical_path().display()),
            Cell::new(sync.workspace_path().display()),
            Cell::new(style::pair_state(&state)),
        ]);
    }
    println!("{}", table);
    println!();

    Ok(if attention {
        Completion::NeedsAttention
    } else {
        Completion::Done
    })
}

fn run_direction(ctx: &AppContext, direction: Direction) -> Result<Completion> {
    let mut blocked = false;
    for (doc, sync) in syncs(ctx) {
        let status = match direction {
            Direction::Capture => sync.capture(),
            Direction::Apply => sync.apply(),
        }
        .with_context(|| format!("{} failed for {}", direction.label(), doc.name()))?;

        blocked |= status.is_blocked();
        println!("{}", style::sync_line(direction.label(), &doc.name(), &status));
    }

    if matches!(direction, Direction::Capture) && !blocked {
        println!(
            "{}",
            style::info("Run 'dev repo sync' to commit and share the canonical copies.")
        );
    }

    Ok(if blocked {
        Completion::NeedsAttention
    } else {
        Completion::Done
    })
}

fn run_check(ctx: &AppContext) -> Result<Completion> {
    let base = ctx.base_path();
    let mut found = 0usize;

    for doc in &ctx.config.instructions {
        let paths = [
            RepoConfig::canonical_path(&ctx.config_dir, doc),
            base.join(&doc.workspace),
        ];
        for path in paths {
            let Some(document) = Document::read(&path)? else {
                continue;
            };
            let regions = ConflictDetector::conflict_regions(document.content());
            if regions.is_empty() && ConflictDetector::has_real_conflict_markers(document.content()) {
                found += 1;
                println!(
                    "{}",
                    style::error(&format!("{}: unmatched conflict marker", path.display()))
                );
            }
            for region in regions {
                found += 1;
                let label = region.label.as_deref().unwrap_or("");
                println!(
                    "{}",
                    style::error(&format!(
                        "{}:{}-{} {}",
                        path.display(),
                        region.start_line,
                        region.end_line,
                        label
                    ))
                );
            }
        }
    }

    if found == 0 {
        println!("{}", style::success("No conflict markers found"));
        return Ok(Completion::Done);
    }

    println!();
    println!(
        "{}",
        style::dim("Edit the files above, remove the markers, then rerun 'dev repo sync'.")
    );
    Ok(Completion::NeedsAttention)
}
