//! End-to-end tests for the config repository cycle.
//!
//! Two "machines" share a config repository through a local bare origin:
//! - each machine has a clone containing `repoconfig/` (the config dir)
//! - each machine has its own workspace base path
//!
//! No network I/O: the origin is a bare repository on disk.

use std::path::PathBuf;

use git2::Repository;
use tempfile::TempDir;

use devsync_core::config::{InstructionsDoc, RepoConfig};
use devsync_core::errors::GitError;
use devsync_core::git::{GitClient, PullOutcome};
use devsync_core::instructions::BlockReason;
use devsync_core::{run_cycle, SyncStatus};

// ===========================================================================
// Helpers
// ===========================================================================

const INITIAL: &str = "# Title\n\n## One\none\n\n## Two\ntwo\n\n## Three\nthree\n";
const DOC: &str = "copilot-instructions.md";
const WORKSPACE_DOC: &str = ".github/copilot-instructions.md";

struct Machine {
    root: PathBuf,
    base: PathBuf,
}

impl Machine {
    fn config_dir(&self) -> PathBuf {
        self.root.join("repoconfig")
    }

    fn workspace_doc(&self) -> PathBuf {
        self.base.join(WORKSPACE_DOC)
    }

    fn canonical_doc(&self) -> PathBuf {
        self.config_dir().join(DOC)
    }

    fn write_workspace(&self, content: &str) {
        std::fs::create_dir_all(self.workspace_doc().parent().unwrap()).unwrap();
        std::fs::write(self.workspace_doc(), content).unwrap();
    }

    fn read_workspace(&self) -> String {
        std::fs::read_to_string(self.workspace_doc()).unwrap()
    }

    fn read_canonical(&self) -> String {
        std::fs::read_to_string(self.canonical_doc()).unwrap()
    }
}

fn test_config() -> RepoConfig {
    let mut config = RepoConfig::default();
    config.instructions = vec![InstructionsDoc::new(DOC, WORKSPACE_DOC)];
    config
}

/// Create a bare origin seeded from machine A, and a clone of it as machine B.
fn setup() -> (TempDir, Machine, Machine) {
    let tmp = TempDir::new().unwrap();
    let origin = tmp.path().join("origin.git");
    Repository::init_bare(&origin).unwrap();

    let a = Machine {
        root: tmp.path().join("a"),
        base: tmp.path().join("a-ws"),
    };
    Repository::init(&a.root).unwrap();
    let config = test_config();
    config.save(&a.config_dir()).unwrap();
    std::fs::write(a.canonical_doc(), INITIAL).unwrap();

    let client = GitClient::open(&a.root).unwrap();
    client
        .commit_paths(
            &[
                PathBuf::from("repoconfig/repos.json"),
                PathBuf::from(format!("repoconfig/{}", DOC)),
            ],
            "seed config",
        )
        .unwrap()
        .unwrap();
    client
        .repo()
        .remote("origin", origin.to_str().unwrap())
        .unwrap();
    let branch = client.current_branch().unwrap();
    client.push("origin", &branch).unwrap();
    Repository::open_bare(&origin)
        .unwrap()
        .set_head(&format!("refs/heads/{}", branch))
        .unwrap();

    let b = Machine {
        root: tmp.path().join("b"),
        base: tmp.path().join("b-ws"),
    };
    GitClient::clone_repo(origin.to_str().unwrap(), &b.root).unwrap();

    // Both workspaces start in sync.
    a.write_workspace(INITIAL);
    b.write_workspace(INITIAL);

    (tmp, a, b)
}

fn cycle(machine: &Machine) -> devsync_core::CycleReport {
    let config = RepoConfig::load_or_init(&machine.config_dir()).unwrap();
    run_cycle(&config, &machine.config_dir(), &machine.base).unwrap()
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn test_clone_contains_registry_and_document() {
    let (_tmp, _a, b) = setup();
    assert_eq!(b.read_canonical(), INITIAL);
    let config = RepoConfig::load_or_init(&b.config_dir()).unwrap();
    assert_eq!(config.instructions.len(), 1);
}

#[test]
fn test_in_sync_cycle_changes_nothing() {
    let (_tmp, a, _b) = setup();
    let report = cycle(&a);
    assert!(report.git_error.is_none(), "{:?}", report.git_error);
    assert_eq!(report.captured[0].status, SyncStatus::NoChange);
    assert_eq!(report.commit, None);
    assert_eq!(report.pull, Some(PullOutcome::UpToDate));
    assert!(!report.pushed);
    assert_eq!(report.applied[0].status, SyncStatus::NoChange);
}

#[test]
fn test_edit_on_one_machine_reaches_the_other() {
    let (_tmp, a, b) = setup();

    b.write_workspace(&format!("{}\n## From B\nb\n", INITIAL));
    let report = cycle(&b);
    assert!(report.git_error.is_none(), "{:?}", report.git_error);
    assert_eq!(report.captured[0].status, SyncStatus::Changed);
    assert!(report.commit.is_some());
    assert!(report.pushed);

    let report = cycle(&a);
    assert!(report.git_error.is_none(), "{:?}", report.git_error);
    assert_eq!(report.pull, Some(PullOutcome::FastForward));
    assert_eq!(report.applied[0].status, SyncStatus::Changed);
    assert!(a.read_workspace().contains("## From B\nb\n"));
    assert_eq!(a.read_workspace(), b.read_workspace());
}

#[test]
fn test_concurrent_edits_in_different_sections_both_survive() {
    let (_tmp, a, b) = setup();

    a.write_workspace(&INITIAL.replace("one\n", "one updated\n"));
    let report = cycle(&a);
    assert!(report.pushed);

    b.write_workspace(&format!("{}\n## Four\nfour\n", INITIAL));
    let report = cycle(&b);
    assert!(report.git_error.is_none(), "{:?}", report.git_error);
    assert!(matches!(report.pull, Some(PullOutcome::Merged(_))));
    assert!(report.pushed);
    let merged = b.read_workspace();
    assert!(merged.contains("one updated"));
    assert!(merged.contains("## Four\nfour"));

    let report = cycle(&a);
    assert_eq!(report.pull, Some(PullOutcome::FastForward));
    assert_eq!(a.read_workspace(), merged);
}

#[test]
fn test_conflicting_pull_hands_conflict_to_workspace() {
    let (_tmp, a, b) = setup();
    let a_version = INITIAL.replace("two\n", "two from a\n");

    a.write_workspace(&a_version);
    assert!(cycle(&a).pushed);

    b.write_workspace(&INITIAL.replace("two\n", "two from b\n"));
    let report = cycle(&b);

    assert!(report.git_error.is_none(), "{:?}", report.git_error);
    assert_eq!(report.captured[0].status, SyncStatus::Changed);
    assert!(matches!(report.pull, Some(PullOutcome::Merged(_))));
    assert!(report.pushed);
    assert!(report.has_blocked());
    assert!(matches!(
        report.pulled[0].status,
        SyncStatus::BlockedByConflict {
            reason: BlockReason::MergeConflict,
            ..
        }
    ));
    assert!(report.applied.is_empty());

    assert_eq!(b.read_canonical(), a_version);
    let workspace = b.read_workspace();
    assert!(workspace.contains("<<<<<<<"));
    assert!(workspace.contains("two from a"));
    assert!(workspace.contains("two from b"));
}

#[test]
fn test_resolved_pull_conflict_reaches_the_other_machine() {
    let (_tmp, a, b) = setup();

    a.write_workspace(&INITIAL.replace("two\n", "two from a\n"));
    assert!(cycle(&a).pushed);
    b.write_workspace(&INITIAL.replace("two\n", "two from b\n"));
    assert!(cycle(&b).has_blocked());

    let resolved = INITIAL.replace("two\n", "two from a and b\n");
    b.write_workspace(&resolved);
    let report = cycle(&b);
    assert!(report.git_error.is_none(), "{:?}", report.git_error);
    assert_eq!(report.captured[0].status, SyncStatus::Changed);
    assert!(report.pulled.is_empty());
    assert!(report.pushed);
    assert!(!report.has_blocked());
    assert_eq!(b.read_canonical(), resolved);

    let report = cycle(&a);
    assert!(report.git_error.is_none(), "{:?}", report.git_error);
    assert_eq!(report.pull, Some(PullOutcome::FastForward));
    assert_eq!(a.read_workspace(), resolved);
}

#[test]
fn test_same_file_edits_in_different_lines_merge_during_pull() {
    let (_tmp, a, b) = setup();

    a.write_workspace(&INITIAL.replace("one\n", "one from a\n"));
    assert!(cycle(&a).pushed);

    b.write_workspace(&INITIAL.replace("three\n", "three from b\n"));
    let report = cycle(&b);

    assert!(report.git_error.is_none(), "{:?}", report.git_error);
    assert!(matches!(report.pull, Some(PullOutcome::Merged(_))));
    assert!(!report.has_blocked());
    let merged = b.read_workspace();
    assert!(merged.contains("one from a"));
    assert!(merged.contains("three from b"));
    assert_eq!(b.read_canonical(), merged);
}

/// Commit `content` as the canonical document on `machine` without running
/// a cycle.
fn commit_canonical(machine: &Machine, content: &str) -> GitClient {
    std::fs::write(machine.canonical_doc(), content).unwrap();
    let client = GitClient::open(&machine.root).unwrap();
    client
        .commit_paths(&[PathBuf::from(format!("repoconfig/{}", DOC))], "edit")
        .unwrap()
        .unwrap();
    client
}

#[test]
fn test_plain_pull_refuses_conflicting_merge() {
    let (_tmp, a, b) = setup();
    let a_client = commit_canonical(&a, &INITIAL.replace("two\n", "two from a\n"));
    let branch = a_client.current_branch().unwrap();
    a_client.push("origin", &branch).unwrap();

    let b_version = INITIAL.replace("two\n", "two from b\n");
    let b_client = commit_canonical(&b, &b_version);

    let err = b_client.pull("origin").unwrap_err();
    match err {
        GitError::MergeConflict(paths) => {
            assert_eq!(paths, vec![format!("repoconfig/{}", DOC)]);
        }
        other => panic!("expected merge conflict, got {:?}", other),
    }
    assert_eq!(b.read_canonical(), b_version);
}

#[test]
fn test_pull_resolving_stages_resolved_content() {
    let (_tmp, a, b) = setup();
    let a_client = commit_canonical(&a, &INITIAL.replace("two\n", "two from a\n"));
    let branch = a_client.current_branch().unwrap();
    a_client.push("origin", &branch).unwrap();
    let b_client = commit_canonical(&b, &INITIAL.replace("two\n", "two from b\n"));

    let mut seen = Vec::new();
    let outcome = b_client
        .pull_resolving("origin", |file| {
            seen.push(file.clone());
            Some("settled\n".to_string())
        })
        .unwrap();

    assert!(matches!(outcome, PullOutcome::Merged(_)));
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].ancestor.as_deref(), Some(INITIAL));
    assert!(seen[0].ours.contains("two from b"));
    assert!(seen[0].theirs.contains("two from a"));
    assert_eq!(b.read_canonical(), "settled\n");
    assert_eq!(
        b_client.head_file_content(&PathBuf::from(format!("repoconfig/{}", DOC))).unwrap(),
        Some("settled\n".to_string())
    );
}

#[test]
fn test_document_blocked_by_markers_is_not_committed() {
    let (_tmp, _a, b) = setup();
    let conflicted = "## Two\n<<<<<<< canonical\nx\n=======\ny\n>>>>>>> workspace\n";
    b.write_workspace(conflicted);

    let report = cycle(&b);
    assert!(report.has_blocked());
    assert_eq!(report.commit, None);
    assert!(report.applied.is_empty());
    assert_eq!(b.read_workspace(), conflicted);
    assert_eq!(b.read_canonical(), INITIAL);
}

#[test]
fn test_default_branch_and_switch() {
    let (_tmp, _a, b) = setup();
    let client = GitClient::open(&b.root).unwrap();
    let default = client.default_branch("origin").unwrap();
    assert_eq!(client.current_branch().as_deref(), Some(default.as_str()));

    let head = client.repo().head().unwrap().peel_to_commit().unwrap();
    client.repo().branch("feature", &head, false).unwrap();
    client.repo().set_head("refs/heads/feature").unwrap();
    assert_eq!(client.current_branch().as_deref(), Some("feature"));

    client.switch_to_remote_branch("origin", &default).unwrap();
    assert_eq!(client.current_branch().as_deref(), Some(default.as_str()));
}
