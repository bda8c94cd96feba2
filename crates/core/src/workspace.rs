//! Tracked repositories on the local disk.
//!
//! Names are paths relative to the workspace base path. Repositories inside a
//! gclient enlistment (a directory holding a `.gclient` file) are named
//! `<enlistment>/<repo>`, e.g. `edge/src`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::{RepoConfig, TrackedRepo};
use crate::errors::{CoreError, RegistryError};
use crate::git::GitClient;

const GCLIENT_FILE: &str = ".gclient";
const ENLISTMENT_REPOS: [&str; 2] = ["src", "depot_tools"];

/// `true` if `path` has a `.git` entry (directory or worktree file).
pub fn is_git_repo(path: &Path) -> bool {
    path.join(".git").exists()
}

fn is_enlistment(path: &Path) -> bool {
    path.join(GCLIENT_FILE).exists()
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Registry name for the repository at `repo_path`.
pub fn compute_repo_name(repo_path: &Path, base_path: Option<&Path>) -> String {
    let repo_path = repo_path
        .canonicalize()
        .unwrap_or_else(|_| repo_path.to_path_buf());

    if let Some(parent) = repo_path.parent() {
        if is_enlistment(parent) {
            return format!("{}/{}", dir_name(parent), dir_name(&repo_path));
        }
    }

    if let Some(base) = base_path {
        let base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
        if let Ok(rel) = repo_path.strip_prefix(&base) {
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if parts.len() >= 2 && is_enlistment(&base.join(&parts[0])) {
                return format!("{}/{}", parts[0], parts[1]);
            }
        }
    }

    dir_name(&repo_path)
}

/// Git repositories directly under `scan_path`, plus `src` and `depot_tools`
/// inside any gclient enlistment found there. Sorted by path.
pub fn scan_for_repos(scan_path: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    if !scan_path.is_dir() {
        return Err(RegistryError::PathNotFound(scan_path.to_path_buf()));
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(scan_path)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();

    let mut found = Vec::new();
    for entry in entries {
        if is_git_repo(&entry) {
            found.push(entry);
        } else if is_enlistment(&entry) {
            debug!(enlistment = %entry.display(), "found gclient enlistment");
            found.extend(
                ENLISTMENT_REPOS
                    .iter()
                    .map(|name| entry.join(name))
                    .filter(|sub| sub.is_dir() && is_git_repo(sub)),
            );
        }
    }

    info!(path = %scan_path.display(), count = found.len(), "scan complete");
    Ok(found)
}

/// Build a registry entry for the repository at `repo_path`.
///
/// A repository without an `origin` remote is accepted with an empty URL.
pub fn describe_repo(repo_path: &Path, base_path: Option<&Path>) -> Result<TrackedRepo, CoreError> {
    if !repo_path.exists() {
        return Err(RegistryError::PathNotFound(repo_path.to_path_buf()).into());
    }
    if !is_git_repo(repo_path) {
        return Err(RegistryError::NotARepository(repo_path.to_path_buf()).into());
    }

    let client = GitClient::open(repo_path)?;
    let remote_url = client.remote_url("origin").unwrap_or_else(|| {
        warn!(path = %repo_path.display(), "no 'origin' remote");
        String::new()
    });

    let added_from = repo_path
        .canonicalize()
        .unwrap_or_else(|_| repo_path.to_path_buf());

    Ok(TrackedRepo {
        name: compute_repo_name(repo_path, base_path),
        remote_url,
        added_from: Some(added_from.display().to_string()),
        added_at: Some(Utc::now()),
    })
}

/// Register the repository at `repo_path`, replacing any entry of the same
/// name. The caller saves the registry.
pub fn track_repo(
    config: &mut RepoConfig,
    repo_path: &Path,
    base_path: &Path,
) -> Result<TrackedRepo, CoreError> {
    let repo = describe_repo(repo_path, Some(base_path))?;
    let replaced = config.upsert_repo(repo.clone());
    info!(name = %repo.name, replaced, "repository tracked");
    Ok(repo)
}

/// Whether a tracked repository exists on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPresence {
    pub repo: TrackedRepo,
    pub path: PathBuf,
    pub present: bool,
}

/// Presence of every tracked repository under `base_path`.
pub fn repo_presence(config: &RepoConfig, base_path: &Path) -> Vec<RepoPresence> {
    config
        .repos
        .iter()
        .map(|repo| {
            let path = repo.target_path(base_path);
            RepoPresence {
                present: is_git_repo(&path),
                repo: repo.clone(),
                path,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;

    fn make_repo(path: &Path) {
        std::fs::create_dir_all(path).unwrap();
        Repository::init(path).unwrap();
    }

    #[test]
    fn test_plain_repo_name() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("tools");
        make_repo(&repo);
        assert_eq!(compute_repo_name(&repo, Some(dir.path())), "tools");
        assert_eq!(compute_repo_name(&repo, None), "tools");
    }

    #[test]
    fn test_enlistment_repo_name() {
        let dir = tempfile::tempdir().unwrap();
        let enlistment = dir.path().join("edge");
        make_repo(&enlistment.join("src"));
        std::fs::write(enlistment.join(GCLIENT_FILE), "solutions = []\n").unwrap();
        assert_eq!(compute_repo_name(&enlistment.join("src"), None), "edge/src");
    }

    #[test]
    fn test_nested_under_enlistment_uses_first_two_parts() {
        let dir = tempfile::tempdir().unwrap();
        let enlistment = dir.path().join("cr");
        std::fs::create_dir_all(&enlistment).unwrap();
        std::fs::write(enlistment.join(GCLIENT_FILE), "").unwrap();
        let deep = enlistment.join("src").join("third_party").join("lib");
        make_repo(&deep);
        assert_eq!(compute_repo_name(&deep, Some(dir.path())), "cr/src");
    }

    #[test]
    fn test_scan_finds_repos_and_enlistment_members() {
        let dir = tempfile::tempdir().unwrap();
        make_repo(&dir.path().join("alpha"));
        std::fs::create_dir_all(dir.path().join("not-a-repo")).unwrap();

        let edge = dir.path().join("edge");
        std::fs::create_dir_all(&edge).unwrap();
        std::fs::write(edge.join(GCLIENT_FILE), "").unwrap();
        make_repo(&edge.join("src"));
        make_repo(&edge.join("depot_tools"));
        make_repo(&edge.join("other"));

        let found = scan_for_repos(dir.path()).unwrap();
        assert_eq!(
            found,
            vec![
                dir.path().join("alpha"),
                edge.join("src"),
                edge.join("depot_tools"),
            ]
        );
    }

    #[test]
    fn test_scan_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            scan_for_repos(&dir.path().join("missing")),
            Err(RegistryError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_track_repo_records_remote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools");
        make_repo(&path);
        Repository::open(&path)
            .unwrap()
            .remote("origin", "git@example.com:me/tools.git")
            .unwrap();

        let mut config = RepoConfig::default();
        let repo = track_repo(&mut config, &path, dir.path()).unwrap();
        assert_eq!(repo.name, "tools");
        assert_eq!(repo.remote_url, "git@example.com:me/tools.git");
        assert!(repo.added_at.is_some());
        assert_eq!(config.repos.len(), 1);
    }

    #[test]
    fn test_track_rejects_non_repo() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RepoConfig::default();
        let err = track_repo(&mut config, dir.path(), dir.path()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Registry(RegistryError::NotARepository(_))
        ));

        let err = track_repo(&mut config, &dir.path().join("gone"), dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::Registry(RegistryError::PathNotFound(_))));
    }

    #[test]
    fn test_repo_presence() {
        let dir = tempfile::tempdir().unwrap();
        make_repo(&dir.path().join("edge").join("src"));

        let mut config = RepoConfig::default();
        for name in ["edge/src", "missing"] {
            config.upsert_repo(TrackedRepo {
                name: name.into(),
                remote_url: String::new(),
                added_from: None,
                added_at: None,
            });
        }

        let presence = repo_presence(&config, dir.path());
        assert!(presence[0].present);
        assert!(!presence[1].present);
        assert_eq!(presence[1].path, dir.path().join("missing"));
    }
}
