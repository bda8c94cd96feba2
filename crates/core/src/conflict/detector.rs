//! Conflict marker detection.
//!
//! Scans a document for unresolved merge markers, ignoring markers that only
//! appear as documentation: anything inside a fenced code block and any line
//! that contains a backtick (inline code).

use tracing::debug;

/// Length of a conflict marker run (`<<<<<<<`, `=======`, `>>>>>>>`).
pub const MARKER_LEN: usize = 7;

const OPENING: &str = "<<<<<<<";
const SEPARATOR: &str = "=======";
const CLOSING: &str = ">>>>>>>";
const FENCE: &str = "```";

/// Kind of a live conflict marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// `<<<<<<< label`
    Opening,
    /// `=======`
    Separator,
    /// `>>>>>>> label`
    Closing,
}

/// A complete `<<<<<<<` / `=======` / `>>>>>>>` block within a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRegion {
    /// Line number (1-indexed) of the opening marker.
    pub start_line: usize,
    /// Line number (1-indexed) of the closing marker.
    pub end_line: usize,
    /// Label text after the opening marker, if any.
    pub label: Option<String>,
}

/// Stateless conflict-marker scanner.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Iterate over `(line_number, kind, line)` for every live marker line.
    fn live_markers(content: &str) -> impl Iterator<Item = (usize, MarkerKind, &str)> {
        let mut in_fence = false;
        content.lines().enumerate().filter_map(move |(idx, line)| {
            if line.trim().starts_with(FENCE) {
                in_fence = !in_fence;
                return None;
            }
            if in_fence || line.contains('`') {
                return None;
            }
            classify_line(line).map(|kind| (idx + 1, kind, line))
        })
    }

    /// `true` if `content` contains an unresolved opening or closing marker
    /// outside code.
    ///
    /// A lone `=======` line does not count: markdown uses the same run of
    /// characters to underline setext headers.
    pub fn has_real_conflict_markers(content: &str) -> bool {
        let found = Self::live_markers(content)
            .find(|(_, kind, _)| matches!(kind, MarkerKind::Opening | MarkerKind::Closing));
        if let Some((line, kind, _)) = found {
            debug!(line, ?kind, "live conflict marker found");
            return true;
        }
        false
    }

    /// Locate every complete marker triple in `content`.
    pub fn conflict_regions(content: &str) -> Vec<ConflictRegion> {
        let mut regions = Vec::new();
        let mut open: Option<(usize, Option<String>)> = None;
        let mut separated = false;

        for (line_no, kind, line) in Self::live_markers(content) {
            match kind {
                MarkerKind::Opening => {
                    let label = line[MARKER_LEN..].trim();
                    let label = (!label.is_empty()).then(|| label.to_string());
                    open = Some((line_no, label));
                    separated = false;
                }
                MarkerKind::Separator => {
                    if open.is_some() {
                        separated = true;
                    }
                }
                MarkerKind::Closing => {
                    if separated {
                        if let Some((start_line, label)) = open.take() {
                            regions.push(ConflictRegion {
                                start_line,
                                end_line: line_no,
                                label,
                            });
                        }
                    }
                    separated = false;
                }
            }
        }

        regions
    }
}

/// Convenience wrapper for [`ConflictDetector::has_real_conflict_markers`].
pub fn has_real_conflict_markers(content: &str) -> bool {
    ConflictDetector::has_real_conflict_markers(content)
}

/// Classify a single line, without regard to code context.
fn classify_line(line: &str) -> Option<MarkerKind> {
    let line = line.strip_suffix('\r').unwrap_or(line);

    if let Some(rest) = line.strip_prefix(OPENING) {
        return followed_by_label(rest, '<').then_some(MarkerKind::Opening);
    }
    if let Some(rest) = line.strip_prefix(CLOSING) {
        return followed_by_label(rest, '>').then_some(MarkerKind::Closing);
    }
    if let Some(rest) = line.strip_prefix(SEPARATOR) {
        return rest.trim().is_empty().then_some(MarkerKind::Separator);
    }
    None
}

/// Opening and closing markers need whitespace or a label after the run,
/// and the run must be exactly seven characters long.
fn followed_by_label(rest: &str, run_char: char) -> bool {
    match rest.chars().next() {
        Some(c) => c != run_char,
        None => false,
    }
}
