//! Three-way merge engine.
//!
//! The two sides of an instructions document rarely share a stored ancestor,
//! so one is reconstructed: the lines that an LCS alignment of canonical and
//! workspace classifies as equal, in order. A line-based three-way merge of
//! `(base, canonical, workspace)` then keeps every line either side added.
//!
//! The line merge itself is delegated to a [`LineMergeBackend`]: the
//! in-process `diffy` merge, or an external `git merge-file` run with a
//! timeout.
//!
//! All three inputs are merged in LF form; the result takes the workspace
//! copy's line-ending style.

use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use similar::{Algorithm, ChangeTag, TextDiff};
use tracing::{debug, info, warn};

use super::detector::{ConflictDetector, ConflictRegion};
use crate::document::{normalize_line_endings, Document};

/// Label for the canonical side in conflict markers.
pub const CANONICAL_LABEL: &str = "canonical";
/// Label for the workspace side in conflict markers.
pub const WORKSPACE_LABEL: &str = "workspace";

const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The result of a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// The merged content (contains conflict markers if `has_conflicts`).
    pub merged_content: String,
    /// Whether the merge left conflicts for manual resolution.
    pub has_conflicts: bool,
    /// Locations of conflict marker blocks within the merged content.
    pub conflict_markers: Vec<ConflictRegion>,
}

impl MergeResult {
    /// A conflict-free result.
    pub fn clean(content: impl Into<String>) -> Self {
        Self {
            merged_content: content.into(),
            has_conflicts: false,
            conflict_markers: Vec::new(),
        }
    }

    /// A result annotated with conflict markers.
    pub fn conflicted(content: impl Into<String>) -> Self {
        let merged_content = content.into();
        let conflict_markers = ConflictDetector::conflict_regions(&merged_content);
        Self {
            merged_content,
            has_conflicts: true,
            conflict_markers,
        }
    }
}

// ---------------------------------------------------------------------------
// Base reconstruction
// ---------------------------------------------------------------------------

/// Approximate the common ancestor of two texts: every line an LCS
/// alignment classifies as equal, in order. Line endings are ignored and the
/// base is returned in LF form.
pub fn reconstruct_base(canonical: &str, workspace: &str) -> String {
    let canonical = normalize_line_endings(canonical);
    let workspace = normalize_line_endings(workspace);
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Lcs)
        .diff_lines(&canonical, &workspace);

    diff.iter_all_changes()
        .filter(|change| change.tag() == ChangeTag::Equal)
        .map(|change| change.value())
        .collect()
}

// ---------------------------------------------------------------------------
// Line-merge backends
// ---------------------------------------------------------------------------

/// Raw output of a line-level three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMergeOutcome {
    pub content: String,
    /// The backend reported conflicts (nonzero status).
    pub conflicted: bool,
}

/// Which primitive performs the base/canonical/workspace line merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMergeBackend {
    /// In-process merge via `diffy`. Always available.
    Builtin,
    /// External `git merge-file -p`, killed after `timeout`.
    GitMergeFile { timeout: Duration },
}

impl Default for LineMergeBackend {
    fn default() -> Self {
        Self::Builtin
    }
}

impl LineMergeBackend {
    /// The external backend with the default timeout.
    pub fn git_merge_file() -> Self {
        Self::GitMergeFile {
            timeout: DEFAULT_MERGE_TIMEOUT,
        }
    }

    /// Merge `canonical` and `workspace` against `base`.
    ///
    /// Returns `None` when the primitive cannot be used; callers fall back to
    /// another strategy rather than failing.
    pub fn merge(&self, base: &str, canonical: &str, workspace: &str) -> Option<LineMergeOutcome> {
        match self {
            Self::Builtin => Some(diffy_merge(base, canonical, workspace)),
            Self::GitMergeFile { timeout } => {
                match git_merge_file(base, canonical, workspace, *timeout) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(error = %e, "git merge-file unavailable");
                        None
                    }
                }
            }
        }
    }
}

fn diffy_merge(base: &str, canonical: &str, workspace: &str) -> LineMergeOutcome {
    let mut options = diffy::MergeOptions::new();
    options.set_conflict_style(diffy::ConflictStyle::Merge);

    match options.merge(base, canonical, workspace) {
        Ok(content) => LineMergeOutcome {
            content,
            conflicted: false,
        },
        Err(content) => LineMergeOutcome {
            content: relabel_diffy_markers(&content),
            conflicted: true,
        },
    }
}

/// `diffy` labels its sides "ours"/"theirs"; name them after the documents.
fn relabel_diffy_markers(content: &str) -> String {
    let opening = format!("<<<<<<< {}", CANONICAL_LABEL);
    let closing = format!(">>>>>>> {}", WORKSPACE_LABEL);

    content
        .split_inclusive('\n')
        .map(|line| {
            let body = line.trim_end_matches(['\r', '\n']);
            let ending = &line[body.len()..];
            match body {
                "<<<<<<< ours" => format!("{}{}", opening, ending),
                ">>>>>>> theirs" => format!("{}{}", closing, ending),
                _ => line.to_string(),
            }
        })
        .collect()
}

/// Run `git merge-file -p` on temp copies of the three inputs.
///
/// `Ok(None)` means git ran but the result is unusable (timeout, crash,
/// non-UTF-8 output). `Err` covers temp-file I/O and spawn failures.
fn git_merge_file(
    base: &str,
    canonical: &str,
    workspace: &str,
    timeout: Duration,
) -> std::io::Result<Option<LineMergeOutcome>> {
    let tmp = tempfile::tempdir()?;
    let canonical_path = tmp.path().join("canonical.md");
    let base_path = tmp.path().join("base.md");
    let workspace_path = tmp.path().join("workspace.md");
    let stdout_path = tmp.path().join("merged.out");

    std::fs::write(&canonical_path, canonical)?;
    std::fs::write(&base_path, base)?;
    std::fs::write(&workspace_path, workspace)?;

    let mut child = Command::new("git")
        .arg("merge-file")
        .arg("-p")
        .args(["-L", CANONICAL_LABEL, "-L", "base", "-L", WORKSPACE_LABEL])
        .arg(&canonical_path)
        .arg(&base_path)
        .arg(&workspace_path)
        .stdin(Stdio::null())
        .stdout(Stdio::from(File::create(&stdout_path)?))
        .stderr(Stdio::null())
        .spawn()?;

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            warn!(timeout_secs = timeout.as_secs(), "git merge-file timed out");
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let conflicted = match status.code() {
        Some(0) => false,
        // Positive exit codes count conflicts; git caps them at 127.
        Some(1..=127) => true,
        other => {
            warn!(exit_code = ?other, "git merge-file failed");
            return Ok(None);
        }
    };

    Ok(read_utf8(&stdout_path)?.map(|content| LineMergeOutcome {
        content,
        conflicted,
    }))
}

fn read_utf8(path: &Path) -> std::io::Result<Option<String>> {
    Ok(String::from_utf8(std::fs::read(path)?).ok())
}

// ---------------------------------------------------------------------------
// Merger
// ---------------------------------------------------------------------------

/// Three-way merger over a reconstructed base.
#[derive(Debug, Clone, Default)]
pub struct ThreeWayMerger {
    backend: LineMergeBackend,
}

impl ThreeWayMerger {
    pub fn new(backend: LineMergeBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &LineMergeBackend {
        &self.backend
    }

    /// Merge the two documents, or `None` if no usable ancestor can be
    /// reconstructed or the backend is unavailable.
    pub fn three_way_merge(&self, canonical: &Document, workspace: &Document) -> Option<MergeResult> {
        if canonical.same_text(workspace) {
            debug!("canonical == workspace, nothing to merge");
            return Some(MergeResult::clean(workspace.content()));
        }

        let base = reconstruct_base(canonical.content(), workspace.content());
        if base.trim().is_empty() {
            debug!("reconstructed base is empty, three-way merge unavailable");
            return None;
        }
        self.merge_against(&base, canonical, workspace)
    }

    /// Merge against a known common ancestor instead of a reconstructed one.
    /// A blank ancestor falls back to reconstruction.
    pub fn three_way_merge_with_base(
        &self,
        ancestor: &Document,
        canonical: &Document,
        workspace: &Document,
    ) -> Option<MergeResult> {
        if ancestor.is_blank() {
            return self.three_way_merge(canonical, workspace);
        }
        if canonical.same_text(workspace) {
            return Some(MergeResult::clean(workspace.content()));
        }
        self.merge_against(&ancestor.normalized(), canonical, workspace)
    }

    fn merge_against(&self, base: &str, canonical: &Document, workspace: &Document) -> Option<MergeResult> {
        info!(base_bytes = base.len(), backend = ?self.backend, "performing three-way merge");
        let outcome = self.backend.merge(
            &normalize_line_endings(base),
            &canonical.normalized(),
            &workspace.normalized(),
        )?;
        let content = workspace.restyle(&outcome.content);

        if outcome.conflicted || ConflictDetector::has_real_conflict_markers(&content) {
            debug!("three-way merge left conflicts");
            Some(MergeResult::conflicted(content))
        } else {
            Some(MergeResult::clean(content))
        }
    }
}
