//! Shared styling utilities for the CLI.

use console::Style;

use devsync_core::{PairState, SyncStatus};

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create an info-styled string (blue arrow).
pub fn info(msg: &str) -> String {
    let style = Style::new().blue();
    format!("{} {}", style.apply_to("→"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Bold header followed by a rule of matching width.
pub fn banner(title: &str) {
    println!();
    println!("{}", header(title));
    println!("{}", "═".repeat(title.chars().count()));
}

/// One line describing a sync direction's outcome for a document.
pub fn sync_line(direction: &str, name: &str, status: &SyncStatus) -> String {
    match status {
        SyncStatus::NoChange => success(&format!("{:<8} {}  {}", direction, name, dim("up to date"))),
        SyncStatus::Changed => success(&format!("{:<8} {}  updated", direction, name)),
        SyncStatus::BlockedByConflict { path, .. } => error(&format!(
            "{:<8} {}  blocked: resolve conflict markers in {}",
            direction,
            name,
            path.display()
        )),
    }
}

/// Colored label for a document pair state.
pub fn pair_state(state: &PairState) -> String {
    let text = state.to_string();
    match state {
        PairState::InSync => Style::new().green().apply_to(text).to_string(),
        PairState::Diverged | PairState::WorkspaceOnly | PairState::CanonicalOnly => {
            Style::new().yellow().apply_to(text).to_string()
        }
        PairState::Conflicted(_) => Style::new().red().bold().apply_to(text).to_string(),
        PairState::Missing => dim(&text),
    }
}
