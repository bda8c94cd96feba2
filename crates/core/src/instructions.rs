//! Instructions document synchronization.
//!
//! Keeps a machine-local workspace copy of a markdown document in step with
//! the canonical copy tracked in the config repository. Each cycle runs two
//! directions:
//!
//! * **capture** (workspace → canonical) before the config repo is committed
//!   and pushed, so local edits travel with the push;
//! * **apply** (canonical → workspace) after the config repo is pulled, so
//!   edits from other machines reach this one.
//!
//! Neither direction ever reads or writes a document that already contains
//! unresolved conflict markers.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::conflict::{has_real_conflict_markers, MergePipeline};
use crate::document::Document;
use crate::errors::SyncError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How capture treats a canonical copy that differs from the workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePolicy {
    /// Workspace replaces canonical outright.
    Overwrite,
    /// Workspace and canonical are merged; nothing is dropped.
    #[default]
    Merge,
}

impl std::fmt::Display for CapturePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overwrite => write!(f, "overwrite"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// One side of the document pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Canonical,
    Workspace,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Canonical => write!(f, "canonical"),
            Self::Workspace => write!(f, "workspace"),
        }
    }
}

/// Why a direction refused to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The input already contained unresolved conflict markers.
    UnresolvedMarkers,
    /// Merging produced conflicts; they were written out for resolution.
    MergeConflict,
}

/// Outcome of one sync direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    NoChange,
    Changed,
    /// Manual resolution needed in the file at `path`.
    BlockedByConflict { path: PathBuf, reason: BlockReason },
}

impl SyncStatus {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::BlockedByConflict { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoChange => "no-change",
            Self::Changed => "changed",
            Self::BlockedByConflict { .. } => "blocked-by-conflict",
        }
    }
}

/// A canonical copy changed both here and on another machine, merged while
/// pulling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PulledMerge {
    /// Both edits merged cleanly.
    Clean(String),
    /// The edits overlap. The remote text is committed as the canonical copy
    /// and `labeled` goes to the workspace copy for manual resolution.
    Conflicted { remote: String, labeled: String },
}

impl PulledMerge {
    /// Content to commit as the canonical copy.
    pub fn canonical(&self) -> &str {
        match self {
            Self::Clean(content) => content,
            Self::Conflicted { remote, .. } => remote,
        }
    }
}

/// Read-only comparison of the two copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// Neither copy exists.
    Missing,
    WorkspaceOnly,
    CanonicalOnly,
    InSync,
    Diverged,
    /// The given side holds unresolved conflict markers.
    Conflicted(Side),
}

impl std::fmt::Display for PairState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::WorkspaceOnly => write!(f, "workspace only"),
            Self::CanonicalOnly => write!(f, "canonical only"),
            Self::InSync => write!(f, "in sync"),
            Self::Diverged => write!(f, "diverged"),
            Self::Conflicted(side) => write!(f, "conflicted ({})", side),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Synchronizes one canonical/workspace document pair.
#[derive(Debug)]
pub struct InstructionsSync {
    canonical_path: PathBuf,
    workspace_path: PathBuf,
    policy: CapturePolicy,
    pipeline: MergePipeline,
    ancestor: Option<Document>,
}

impl InstructionsSync {
    /// Coordinator with the default policy and merge pipeline.
    pub fn new(canonical_path: impl Into<PathBuf>, workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            canonical_path: canonical_path.into(),
            workspace_path: workspace_path.into(),
            policy: CapturePolicy::default(),
            pipeline: MergePipeline::default(),
            ancestor: None,
        }
    }

    pub fn with_policy(mut self, policy: CapturePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_pipeline(mut self, pipeline: MergePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Last shared version of the document (typically the committed
    /// canonical copy), used as the merge base during capture.
    pub fn with_ancestor(mut self, ancestor: Option<Document>) -> Self {
        self.ancestor = ancestor;
        self
    }

    pub fn canonical_path(&self) -> &Path {
        &self.canonical_path
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    pub fn policy(&self) -> CapturePolicy {
        self.policy
    }

    /// Workspace → canonical. Run before the config repo is committed.
    #[instrument(skip(self), fields(workspace = %self.workspace_path.display()))]
    pub fn capture(&self) -> Result<SyncStatus, SyncError> {
        let Some(workspace) = Document::read(&self.workspace_path)? else {
            debug!("no workspace copy, nothing to capture");
            return Ok(SyncStatus::NoChange);
        };

        if has_real_conflict_markers(workspace.content()) {
            warn!("workspace copy has unresolved conflict markers, capture skipped");
            return Ok(self.blocked(Side::Workspace, BlockReason::UnresolvedMarkers));
        }

        let canonical = Document::read(&self.canonical_path)?.unwrap_or_default();

        if canonical.same_text(&workspace) {
            debug!("copies already equal");
            return Ok(SyncStatus::NoChange);
        }

        if canonical.is_blank() {
            info!("canonical copy empty, taking workspace copy");
            workspace.write(&self.canonical_path)?;
            return Ok(SyncStatus::Changed);
        }

        let merged = match self.policy {
            CapturePolicy::Overwrite => workspace,
            CapturePolicy::Merge => {
                let outcome =
                    self.pipeline
                        .run_with_ancestor(self.ancestor.as_ref(), &canonical, &workspace);
                info!(
                    strategy = outcome.strategy,
                    conflicts = outcome.result.has_conflicts,
                    "merged workspace into canonical"
                );
                if outcome.result.has_conflicts {
                    Document::new(outcome.result.merged_content).write(&self.workspace_path)?;
                    warn!("merge conflicts written to workspace copy");
                    return Ok(self.blocked(Side::Workspace, BlockReason::MergeConflict));
                }
                Document::new(outcome.result.merged_content)
            }
        };

        if merged.same_text(&canonical) {
            debug!("merge left canonical unchanged");
            return Ok(SyncStatus::NoChange);
        }

        merged.write(&self.canonical_path)?;
        info!(policy = %self.policy, "canonical copy updated");
        Ok(SyncStatus::Changed)
    }

    /// Canonical → workspace. Run after the config repo is pulled.
    #[instrument(skip(self), fields(canonical = %self.canonical_path.display()))]
    pub fn apply(&self) -> Result<SyncStatus, SyncError> {
        let Some(canonical) = Document::read(&self.canonical_path)? else {
            debug!("no canonical copy, nothing to apply");
            return Ok(SyncStatus::NoChange);
        };

        if has_real_conflict_markers(canonical.content()) {
            warn!("canonical copy has unresolved conflict markers, apply skipped");
            return Ok(self.blocked(Side::Canonical, BlockReason::UnresolvedMarkers));
        }

        if let Some(workspace) = Document::read(&self.workspace_path)? {
            if workspace.same_text(&canonical) {
                debug!("copies already equal");
                return Ok(SyncStatus::NoChange);
            }
        }

        canonical.write(&self.workspace_path)?;
        info!("workspace copy updated");
        Ok(SyncStatus::Changed)
    }

    /// Merge the local and remote versions of the canonical copy found
    /// conflicting by a pull. Writes nothing.
    ///
    /// Returns `None` while the workspace copy still holds unresolved markers
    /// from an earlier conflict, so those are never overwritten.
    pub fn merge_pulled(
        &self,
        ancestor: Option<&Document>,
        remote: &Document,
        local: &Document,
    ) -> Result<Option<PulledMerge>, SyncError> {
        if let Some(workspace) = Document::read(&self.workspace_path)? {
            if has_real_conflict_markers(workspace.content()) {
                warn!(
                    workspace = %self.workspace_path.display(),
                    "workspace copy still has conflict markers, leaving pull conflict"
                );
                return Ok(None);
            }
        }

        let outcome = self.pipeline.run_with_ancestor(ancestor, remote, local);
        info!(
            strategy = outcome.strategy,
            conflicts = outcome.result.has_conflicts,
            "merged remote canonical copy"
        );
        Ok(Some(if outcome.result.has_conflicts {
            PulledMerge::Conflicted {
                remote: remote.content().to_string(),
                labeled: outcome.result.merged_content,
            }
        } else {
            PulledMerge::Clean(outcome.result.merged_content)
        }))
    }

    /// Write a conflicted pull merge to the workspace copy.
    pub fn hand_over_conflict(&self, labeled: &str) -> Result<SyncStatus, SyncError> {
        Document::new(labeled).write(&self.workspace_path)?;
        warn!(workspace = %self.workspace_path.display(), "pull conflicts written to workspace copy");
        Ok(self.blocked(Side::Workspace, BlockReason::MergeConflict))
    }

    /// Compare the two copies without writing anything.
    pub fn state(&self) -> Result<PairState, SyncError> {
        let canonical = Document::read(&self.canonical_path)?;
        let workspace = Document::read(&self.workspace_path)?;

        let state = match (canonical, workspace) {
            (None, None) => PairState::Missing,
            (_, Some(w)) if has_real_conflict_markers(w.content()) => {
                PairState::Conflicted(Side::Workspace)
            }
            (Some(c), _) if has_real_conflict_markers(c.content()) => {
                PairState::Conflicted(Side::Canonical)
            }
            (None, Some(_)) => PairState::WorkspaceOnly,
            (Some(_), None) => PairState::CanonicalOnly,
            (Some(c), Some(w)) if c.same_text(&w) => PairState::InSync,
            (Some(_), Some(_)) => PairState::Diverged,
        };
        Ok(state)
    }

    fn blocked(&self, side: Side, reason: BlockReason) -> SyncStatus {
        let path = match side {
            Side::Canonical => self.canonical_path.clone(),
            Side::Workspace => self.workspace_path.clone(),
        };
        SyncStatus::BlockedByConflict { path, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFLICT: &str = "## Section\n<<<<<<< HEAD\nVersion A\n=======\nVersion B\n>>>>>>> branch\n";

    struct Pair {
        _dir: tempfile::TempDir,
        canonical: PathBuf,
        workspace: PathBuf,
    }

    impl Pair {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let canonical = dir.path().join("repoconfig").join("CLAUDE.md");
            let workspace = dir.path().join("workspace").join(".claude").join("CLAUDE.md");
            Self {
                _dir: dir,
                canonical,
                workspace,
            }
        }

        fn sync(&self) -> InstructionsSync {
            InstructionsSync::new(&self.canonical, &self.workspace)
        }

        fn write_canonical(&self, content: &str) {
            Document::new(content).write(&self.canonical).unwrap();
        }

        fn write_workspace(&self, content: &str) {
            Document::new(content).write(&self.workspace).unwrap();
        }

        fn canonical(&self) -> Option<String> {
            std::fs::read_to_string(&self.canonical).ok()
        }

        fn workspace(&self) -> Option<String> {
            std::fs::read_to_string(&self.workspace).ok()
        }
    }

    #[test]
    fn test_capture_without_workspace_is_noop() {
        let pair = Pair::new();
        pair.write_canonical("# Dev\n");
        assert_eq!(pair.sync().capture().unwrap(), SyncStatus::NoChange);
        assert_eq!(pair.canonical().as_deref(), Some("# Dev\n"));
    }

    #[test]
    fn test_capture_into_missing_canonical() {
        let pair = Pair::new();
        pair.write_workspace("# Dev CLI\n\nNew content\n");
        assert_eq!(pair.sync().capture().unwrap(), SyncStatus::Changed);
        assert_eq!(pair.canonical().as_deref(), Some("# Dev CLI\n\nNew content\n"));
    }

    #[test]
    fn test_capture_adds_new_section() {
        let pair = Pair::new();
        pair.write_canonical("## Rules\nInitial\n");
        pair.write_workspace("## Rules\nInitial\n\n## New\nAdded\n");

        assert_eq!(pair.sync().capture().unwrap(), SyncStatus::Changed);
        let canonical = pair.canonical().unwrap();
        assert!(canonical.contains("## Rules"));
        assert!(canonical.contains("## New\nAdded"));
    }

    #[test]
    fn test_capture_is_idempotent() {
        let pair = Pair::new();
        pair.write_canonical("# T\n\n## Remote\nr\n\n## Rules\nInitial\n");
        pair.write_workspace("# T\n\n## Rules\nInitial\n\n## Local\nl\n");

        let sync = pair.sync();
        assert_eq!(sync.capture().unwrap(), SyncStatus::Changed);
        assert_eq!(sync.capture().unwrap(), SyncStatus::NoChange);
    }

    #[test]
    fn test_capture_blocks_on_workspace_markers() {
        let pair = Pair::new();
        pair.write_workspace(CONFLICT);
        pair.write_canonical("original");

        let status = pair.sync().capture().unwrap();
        assert_eq!(
            status,
            SyncStatus::BlockedByConflict {
                path: pair.workspace.clone(),
                reason: BlockReason::UnresolvedMarkers,
            }
        );
        assert_eq!(pair.canonical().as_deref(), Some("original"));
        assert_eq!(pair.workspace().as_deref(), Some(CONFLICT));
    }

    #[test]
    fn test_capture_ignores_line_ending_differences() {
        let pair = Pair::new();
        pair.write_canonical("## Rules\nSome rules\n");
        pair.write_workspace("## Rules\r\nSome rules\r\n");
        assert_eq!(pair.sync().capture().unwrap(), SyncStatus::NoChange);
        assert_eq!(pair.canonical().as_deref(), Some("## Rules\nSome rules\n"));
    }

    #[test]
    fn test_capture_overwrite_policy_replaces_canonical() {
        let pair = Pair::new();
        pair.write_canonical("## Old Section\nOld content\n");
        pair.write_workspace("## New Section\nNew content\n");

        let sync = pair.sync().with_policy(CapturePolicy::Overwrite);
        assert_eq!(sync.capture().unwrap(), SyncStatus::Changed);
        assert_eq!(pair.canonical().as_deref(), Some("## New Section\nNew content\n"));
    }

    #[test]
    fn test_capture_merge_policy_keeps_both_sides() {
        let pair = Pair::new();
        pair.write_canonical("## Old Section\nOld content\n");
        pair.write_workspace("## New Section\nNew content\n");

        assert_eq!(pair.sync().capture().unwrap(), SyncStatus::Changed);
        let canonical = pair.canonical().unwrap();
        assert!(canonical.contains("Old content"));
        assert!(canonical.contains("New content"));
    }

    #[test]
    fn test_capture_merge_conflict_goes_to_workspace() {
        let pair = Pair::new();
        pair.write_canonical("## A\nX\n");
        pair.write_workspace("## A\nY\n");

        let status = pair.sync().capture().unwrap();
        assert_eq!(
            status,
            SyncStatus::BlockedByConflict {
                path: pair.workspace.clone(),
                reason: BlockReason::MergeConflict,
            }
        );
        assert_eq!(pair.canonical().as_deref(), Some("## A\nX\n"));
        let workspace = pair.workspace().unwrap();
        assert!(workspace.contains("<<<<<<< canonical"));
        assert!(workspace.contains(">>>>>>> workspace"));

        // The next cycle stays blocked until the markers are resolved.
        assert!(pair.sync().capture().unwrap().is_blocked());
    }

    #[test]
    fn test_capture_with_ancestor_takes_line_edit() {
        let pair = Pair::new();
        pair.write_canonical("## A\nX\n\n## B\nb\n");
        pair.write_workspace("## A\nY\n\n## B\nb\n");

        let sync = pair
            .sync()
            .with_ancestor(Some(Document::new("## A\nX\n\n## B\nb\n")));
        assert_eq!(sync.capture().unwrap(), SyncStatus::Changed);
        assert_eq!(pair.canonical().as_deref(), Some("## A\nY\n\n## B\nb\n"));
    }

    #[test]
    fn test_capture_crlf_workspace_over_lf_canonical() {
        let pair = Pair::new();
        pair.write_canonical("## Rules\nInitial\n");
        pair.write_workspace("## Rules\r\nInitial\r\n\r\n## New\r\nAdded\r\n");

        assert_eq!(pair.sync().capture().unwrap(), SyncStatus::Changed);
        assert_eq!(
            pair.canonical().as_deref(),
            Some("## Rules\r\nInitial\r\n\r\n## New\r\nAdded\r\n")
        );
        assert_eq!(
            pair.workspace().as_deref(),
            Some("## Rules\r\nInitial\r\n\r\n## New\r\nAdded\r\n")
        );
    }

    #[test]
    fn test_capture_crlf_workspace_with_lf_ancestor() {
        let pair = Pair::new();
        pair.write_canonical("## A\r\nX\r\n\r\n## B\r\nb\r\n");
        pair.write_workspace("## A\r\nY\r\n\r\n## B\r\nb\r\n");

        let sync = pair
            .sync()
            .with_ancestor(Some(Document::new("## A\nX\n\n## B\nb\n")));
        assert_eq!(sync.capture().unwrap(), SyncStatus::Changed);
        assert_eq!(pair.canonical().as_deref(), Some("## A\r\nY\r\n\r\n## B\r\nb\r\n"));
    }

    #[test]
    fn test_merge_pulled_clean() {
        let pair = Pair::new();
        pair.write_workspace("a\nb\nc\nd\ne\n");
        let merged = pair
            .sync()
            .merge_pulled(
                Some(&"a\nb\nc\nd\ne\n".into()),
                &"a\nB\nc\nd\ne\n".into(),
                &"a\nb\nc\nd\nE\n".into(),
            )
            .unwrap();
        assert_eq!(merged, Some(PulledMerge::Clean("a\nB\nc\nd\nE\n".into())));
        assert_eq!(pair.workspace().as_deref(), Some("a\nb\nc\nd\ne\n"));
    }

    #[test]
    fn test_merge_pulled_conflict_keeps_remote_and_labels_local() {
        let pair = Pair::new();
        let sync = pair.sync();
        let merged = sync
            .merge_pulled(Some(&"## A\nX\n".into()), &"## A\nR\n".into(), &"## A\nL\n".into())
            .unwrap()
            .unwrap();
        assert_eq!(merged.canonical(), "## A\nR\n");
        let PulledMerge::Conflicted { labeled, .. } = merged else {
            panic!("expected a conflict");
        };
        assert!(labeled.contains("<<<<<<< canonical"));
        assert!(labeled.contains("R\n"));
        assert!(labeled.contains("L\n"));

        let status = sync.hand_over_conflict(&labeled).unwrap();
        assert_eq!(
            status,
            SyncStatus::BlockedByConflict {
                path: pair.workspace.clone(),
                reason: BlockReason::MergeConflict
            }
        );
        assert_eq!(pair.workspace(), Some(labeled));
    }

    #[test]
    fn test_merge_pulled_defers_to_unresolved_workspace() {
        let pair = Pair::new();
        pair.write_workspace(CONFLICT);
        let merged = pair
            .sync()
            .merge_pulled(None, &"## A\nR\n".into(), &"## A\nL\n".into())
            .unwrap();
        assert_eq!(merged, None);
        assert_eq!(pair.workspace().as_deref(), Some(CONFLICT));
    }

    #[test]
    fn test_capture_then_apply_converges() {
        let pair = Pair::new();
        pair.write_canonical("# T\n\n## Remote\nr\n\n## Shared\ns\n");
        pair.write_workspace("# T\n\n## Shared\ns\n\n## Local\nl\n");

        let sync = pair.sync();
        assert_eq!(sync.capture().unwrap(), SyncStatus::Changed);
        assert_eq!(sync.apply().unwrap(), SyncStatus::Changed);
        assert_eq!(pair.canonical(), pair.workspace());
        let merged = pair.workspace().unwrap();
        assert!(merged.contains("## Remote\nr\n"));
        assert!(merged.contains("## Local\nl\n"));
        assert_eq!(sync.state().unwrap(), PairState::InSync);
    }

    #[test]
    fn test_apply_creates_workspace_dir() {
        let pair = Pair::new();
        pair.write_canonical("# Dev CLI\n\nContent\n");
        assert_eq!(pair.sync().apply().unwrap(), SyncStatus::Changed);
        assert_eq!(pair.workspace().as_deref(), Some("# Dev CLI\n\nContent\n"));
    }

    #[test]
    fn test_apply_without_canonical_is_noop() {
        let pair = Pair::new();
        pair.write_workspace("local\n");
        assert_eq!(pair.sync().apply().unwrap(), SyncStatus::NoChange);
        assert_eq!(pair.workspace().as_deref(), Some("local\n"));
    }

    #[test]
    fn test_apply_blocks_on_canonical_markers() {
        let pair = Pair::new();
        pair.write_canonical(CONFLICT);
        pair.write_workspace("original");

        let status = pair.sync().apply().unwrap();
        assert!(status.is_blocked());
        assert_eq!(pair.workspace().as_deref(), Some("original"));
    }

    #[test]
    fn test_apply_propagates_remote_section() {
        let pair = Pair::new();
        pair.write_workspace("# Dev CLI\n\nInitial content\n");
        pair.write_canonical("# Dev CLI\n\nInitial content\n\n## Remote Section\nFrom another machine.\n");

        assert_eq!(pair.sync().apply().unwrap(), SyncStatus::Changed);
        assert!(pair.workspace().unwrap().contains("Remote Section"));
        assert_eq!(pair.sync().apply().unwrap(), SyncStatus::NoChange);
    }

    #[test]
    fn test_state() {
        let pair = Pair::new();
        assert_eq!(pair.sync().state().unwrap(), PairState::Missing);

        pair.write_workspace("a\n");
        assert_eq!(pair.sync().state().unwrap(), PairState::WorkspaceOnly);

        pair.write_canonical("a\r\n");
        assert_eq!(pair.sync().state().unwrap(), PairState::InSync);

        pair.write_canonical("b\n");
        assert_eq!(pair.sync().state().unwrap(), PairState::Diverged);

        pair.write_canonical(CONFLICT);
        assert_eq!(
            pair.sync().state().unwrap(),
            PairState::Conflicted(Side::Canonical)
        );
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(SyncStatus::NoChange.label(), "no-change");
        assert_eq!(SyncStatus::Changed.label(), "changed");
        let blocked = SyncStatus::BlockedByConflict {
            path: PathBuf::from("x"),
            reason: BlockReason::MergeConflict,
        };
        assert_eq!(blocked.label(), "blocked-by-conflict");
    }
}
