//! Registry listings.

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use devsync_core::workspace;

use crate::style;
use crate::{AppContext, Completion};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

/// List every tracked repository.
pub fn run_list(ctx: &AppContext) -> Result<Completion> {
    let repos = &ctx.config.repos;
    if repos.is_empty() {
        println!();
        println!("{}", style::warn("No repositories tracked yet."));
        println!("{}", style::dim("Use 'dev repo add <path>' to add a repository."));
        println!();
        return Ok(Completion::Done);
    }

    style::banner(&format!("Tracked Repositories ({})", repos.len()));
    println!();

    let mut table = new_table(vec!["Name", "Remote", "Added"]);
    for repo in repos {
        let remote = if repo.remote_url.is_empty() {
            "-".to_string()
        } else {
            repo.remote_url.clone()
        };
        let added = repo
            .added_at
            .map(|t| t.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        table.add_row(vec![Cell::new(&repo.name), Cell::new(remote), Cell::new(added)]);
    }

    println!("{}", table);
    println!();
    Ok(Completion::Done)
}

/// Show which tracked repositories exist under this machine's base path.
pub fn run_status(ctx: &AppContext) -> Result<Completion> {
    let base = ctx.base_path();
    style::banner("Repository Status");
    println!("  Base path  {}", base.display());
    println!();

    let presence = workspace::repo_presence(&ctx.config, &base);
    let mut table = new_table(vec!["Name", "State", "Path"]);
    for entry in &presence {
        let state = if entry.present {
            Cell::new("present").fg(Color::Green)
        } else {
            Cell::new("missing").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&entry.repo.name),
            state,
            Cell::new(entry.path.display()),
        ]);
    }
    println!("{}", table);

    let present = presence.iter().filter(|p| p.present).count();
    println!();
    println!(
        "Present: {} | Missing: {}",
        present,
        presence.len() - present
    );
    if present < presence.len() {
        println!("{}", style::dim("Run 'dev repo sync' to clone missing repositories."));
    }
    println!();
    Ok(Completion::Done)
}
