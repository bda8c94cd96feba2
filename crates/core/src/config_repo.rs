//! The config repository cycle.
//!
//! The config directory lives inside a git repository shared between
//! machines. One cycle captures every instructions document into it, commits,
//! pulls, pushes when ahead, and finally applies the (possibly updated)
//! canonical copies back to the workspace.
//!
//! Git failures do not abort the cycle: they are recorded in the report and
//! the remaining git steps are skipped, so documents are still applied.
//!
//! When the pull's merge conflicts on an instructions document, the document
//! engine merges the two versions against the merge base. Overlapping edits
//! end up labeled in the workspace copy and the remote text is committed, so
//! the next cycle can capture the user's resolution.

use std::path::{Path, PathBuf};

use git2::Oid;
use tracing::{debug, info, instrument, warn};

use crate::config::{InstructionsDoc, RepoConfig, CONFIG_FILE_NAME};
use crate::errors::{GitError, SyncError};
use crate::git::{ConflictedFile, GitClient, PullOutcome};
use crate::document::Document;
use crate::instructions::{BlockReason, InstructionsSync, PulledMerge, SyncStatus};

const REMOTE: &str = "origin";
const COMMIT_MESSAGE: &str = "Sync instructions and repository registry";

/// Git access to the repository holding the config directory.
#[derive(Debug)]
pub struct ConfigRepo {
    client: GitClient,
}

impl ConfigRepo {
    /// Find the repository containing `config_dir`.
    pub fn open(config_dir: &Path) -> Result<Self, GitError> {
        Ok(Self {
            client: GitClient::discover(config_dir)?,
        })
    }

    pub fn client(&self) -> &GitClient {
        &self.client
    }

    pub fn has_remote(&self) -> bool {
        self.client.remote_url(REMOTE).is_some()
    }

    /// Work-tree-relative path of `file`, if it exists inside the repository.
    fn relative_path(&self, file: &Path) -> Result<Option<PathBuf>, GitError> {
        let workdir = self.client.repo_path().canonicalize()?;
        let Ok(absolute) = file.canonicalize() else {
            debug!(file = %file.display(), "not present");
            return Ok(None);
        };
        match absolute.strip_prefix(&workdir) {
            Ok(rel) => Ok(Some(rel.to_path_buf())),
            Err(_) => {
                warn!(file = %file.display(), "outside the config repository");
                Ok(None)
            }
        }
    }

    /// The committed (HEAD) version of `file`, used as the merge ancestor.
    pub fn committed_document(&self, file: &Path) -> Option<Document> {
        let rel = self.relative_path(file).ok()??;
        match self.client.head_file_content(&rel) {
            Ok(content) => content.map(Document::new),
            Err(e) => {
                debug!(error = %e, file = %rel.display(), "no committed version");
                None
            }
        }
    }

    /// Commit the given files if they changed. Files that do not exist are
    /// skipped.
    #[instrument(skip(self, files))]
    pub fn commit_files(&self, files: &[PathBuf], message: &str) -> Result<Option<Oid>, GitError> {
        let mut relative = Vec::new();
        for file in files {
            if let Some(rel) = self.relative_path(file)? {
                relative.push(rel);
            }
        }
        if relative.is_empty() {
            return Ok(None);
        }
        self.client.commit_paths(&relative, message)
    }

    /// Pull from `origin`, merging instructions documents that conflict.
    ///
    /// Merges that let the pull complete are appended to `merged`; nothing
    /// is appended when the pull fails.
    pub fn pull_merging(
        &self,
        syncs: &[(InstructionsDoc, InstructionsSync)],
        merged: &mut Vec<(InstructionsDoc, PulledMerge)>,
    ) -> Result<PullOutcome, GitError> {
        if !self.has_remote() {
            debug!("config repository has no remote");
            return Ok(PullOutcome::NoUpstream);
        }

        let mut targets = Vec::new();
        for (doc, sync) in syncs {
            if let Some(rel) = self.relative_path(sync.canonical_path())? {
                targets.push((rel, doc, sync));
            }
        }

        let mut pending = Vec::new();
        let outcome = self.client.pull_resolving(REMOTE, |file: &ConflictedFile| {
            let (_, doc, sync) = targets.iter().find(|(rel, _, _)| *rel == file.path)?;
            let ancestor = file.ancestor.as_deref().map(Document::new);
            let remote = Document::new(file.theirs.as_str());
            let local = Document::new(file.ours.as_str());
            match sync.merge_pulled(ancestor.as_ref(), &remote, &local) {
                Ok(Some(merge)) => {
                    let content = merge.canonical().to_string();
                    pending.push(((*doc).clone(), merge));
                    Some(content)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(error = %e, doc = %doc.name(), "cannot merge pulled document");
                    None
                }
            }
        })?;
        merged.extend(pending);
        Ok(outcome)
    }

    /// Push the current branch if it has commits `origin` lacks.
    pub fn push_if_ahead(&self) -> Result<bool, GitError> {
        if !self.has_remote() {
            return Ok(false);
        }
        let branch = self.client.current_branch().ok_or(GitError::DetachedHead)?;
        let (ahead, _) = self.client.ahead_behind(REMOTE)?;
        if ahead == 0 {
            debug!("nothing to push");
            return Ok(false);
        }
        info!(ahead, %branch, "pushing config repository");
        self.client.push(REMOTE, &branch)?;
        Ok(true)
    }
}

/// Status of one document in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReport {
    pub doc: InstructionsDoc,
    pub status: SyncStatus,
}

/// Everything one cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub captured: Vec<DocumentReport>,
    pub commit: Option<Oid>,
    pub pull: Option<PullOutcome>,
    /// Documents that changed on both sides and were merged by the pull.
    pub pulled: Vec<DocumentReport>,
    pub pushed: bool,
    /// The git step that failed, if any. Later git steps were skipped.
    pub git_error: Option<GitError>,
    pub applied: Vec<DocumentReport>,
}

impl CycleReport {
    /// Documents left blocked in either direction.
    pub fn blocked(&self) -> impl Iterator<Item = &DocumentReport> {
        self.captured
            .iter()
            .chain(self.pulled.iter())
            .chain(self.applied.iter())
            .filter(|r| r.status.is_blocked())
    }

    pub fn has_blocked(&self) -> bool {
        self.blocked().next().is_some()
    }
}

/// Coordinator for `doc`, using the committed canonical copy as the merge
/// ancestor when the config directory is under git.
pub fn coordinator(
    config: &RepoConfig,
    doc: &InstructionsDoc,
    config_dir: &Path,
    base_path: &Path,
    repo: Option<&ConfigRepo>,
) -> InstructionsSync {
    let sync = config.instructions_sync(doc, config_dir, base_path);
    let ancestor = repo.and_then(|r| r.committed_document(sync.canonical_path()));
    sync.with_ancestor(ancestor)
}

/// Run a full capture → commit → pull → push → apply cycle.
///
/// Only document I/O failures are returned as errors. A document blocked
/// during capture is not applied, so its workspace copy keeps the markers
/// the user has to resolve.
#[instrument(skip_all, fields(config_dir = %config_dir.display(), base = %base_path.display()))]
pub fn run_cycle(
    config: &RepoConfig,
    config_dir: &Path,
    base_path: &Path,
) -> Result<CycleReport, SyncError> {
    let mut report = CycleReport::default();
    let repo = ConfigRepo::open(config_dir);

    for doc in &config.instructions {
        let status = coordinator(config, doc, config_dir, base_path, repo.as_ref().ok()).capture()?;
        report.captured.push(DocumentReport {
            doc: doc.clone(),
            status,
        });
    }

    let git_result =
        repo.and_then(|repo| git_steps(&repo, config, config_dir, base_path, &mut report));
    if let Err(e) = git_result {
        warn!(error = %e, "config repository sync incomplete");
        report.git_error = Some(e);
    }

    for doc in &config.instructions {
        let blocked = report
            .captured
            .iter()
            .chain(report.pulled.iter())
            .any(|r| &r.doc == doc && r.status.is_blocked());
        if blocked {
            debug!(doc = %doc.name(), "skipping apply for blocked document");
            continue;
        }
        let status = config.instructions_sync(doc, config_dir, base_path).apply()?;
        report.applied.push(DocumentReport {
            doc: doc.clone(),
            status,
        });
    }

    Ok(report)
}

fn git_steps(
    repo: &ConfigRepo,
    config: &RepoConfig,
    config_dir: &Path,
    base_path: &Path,
    report: &mut CycleReport,
) -> Result<(), GitError> {
    let mut files: Vec<PathBuf> = config
        .instructions
        .iter()
        .map(|doc| RepoConfig::canonical_path(config_dir, doc))
        .collect();
    files.push(config_dir.join(CONFIG_FILE_NAME));

    report.commit = repo.commit_files(&files, COMMIT_MESSAGE)?;
    let syncs: Vec<(InstructionsDoc, InstructionsSync)> = config
        .instructions
        .iter()
        .map(|doc| (doc.clone(), config.instructions_sync(doc, config_dir, base_path)))
        .collect();
    let mut merged = Vec::new();
    report.pull = Some(repo.pull_merging(&syncs, &mut merged)?);

    for (doc, merge) in merged {
        let Some((_, sync)) = syncs.iter().find(|(d, _)| *d == doc) else {
            continue;
        };
        let status = match merge {
            PulledMerge::Clean(_) => SyncStatus::Changed,
            PulledMerge::Conflicted { labeled, .. } => {
                sync.hand_over_conflict(&labeled).unwrap_or_else(|e| {
                    warn!(error = %e, doc = %doc.name(), "cannot write pull conflict to workspace");
                    SyncStatus::BlockedByConflict {
                        path: sync.workspace_path().to_path_buf(),
                        reason: BlockReason::MergeConflict,
                    }
                })
            }
        };
        report.pulled.push(DocumentReport { doc, status });
    }

    report.pushed = repo.push_if_ahead()?;
    Ok(())
}
