//! Local Git repository operations via `git2`.
//!
//! Network operations authenticate with whatever the user already has set
//! up: the SSH agent for SSH remotes, the configured credential helper for
//! HTTPS ones.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use chrono::Utc;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Cred, CredentialType, FetchOptions, Oid, PushOptions, RemoteCallbacks,
    Repository, Signature,
};
use tracing::{debug, info, instrument, warn};

use crate::errors::GitError;

const MAX_CREDENTIAL_ATTEMPTS: usize = 3;
const FALLBACK_AUTHOR: (&str, &str) = ("devsync", "devsync@localhost");
const INDEX_STAGE_MASK: u16 = 0x3000;

/// What a pull did to the local branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    FastForward,
    /// A merge commit joining local and remote history.
    Merged(Oid),
    /// The remote has no branch of this name yet.
    NoUpstream,
}

/// One file left conflicted by a pull's merge, with all three versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictedFile {
    /// Path relative to the work tree.
    pub path: PathBuf,
    /// Merge-base version; `None` when both sides added the file.
    pub ancestor: Option<String>,
    /// Local branch version.
    pub ours: String,
    /// Remote branch version.
    pub theirs: String,
}

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
}

impl std::fmt::Debug for GitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitClient")
            .field("repo_path", &self.repo_path)
            .finish()
    }
}

impl GitClient {
    /// Open the repository whose work tree is exactly `repo_path`.
    pub fn open<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        debug!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
        })
    }

    /// Open the repository containing `path`, walking up parent directories.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let path = path.as_ref();
        let repo = Repository::discover(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        let repo_path = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::RepositoryNotFound(path.display().to_string()))?;
        debug!(path = %repo_path.display(), "discovered git repository");
        Ok(Self { repo, repo_path })
    }

    /// Clone `url` into `path`.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub fn clone_repo(url: &str, path: &Path) -> Result<Self, GitError> {
        info!("cloning git repository");
        let config = git2::Config::open_default()?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(&config));

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        let repo = builder.clone(url, path)?;
        info!("clone completed");
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// URL of the named remote, if it exists.
    pub fn remote_url(&self, remote_name: &str) -> Option<String> {
        self.repo
            .find_remote(remote_name)
            .ok()
            .and_then(|r| r.url().map(str::to_string))
    }

    /// Short name of the checked-out branch, or `None` when detached/unborn.
    pub fn current_branch(&self) -> Option<String> {
        let head = self.repo.head().ok()?;
        if !head.is_branch() {
            return None;
        }
        head.shorthand().map(str::to_string)
    }

    /// The remote's default branch: `refs/remotes/<remote>/HEAD` when set,
    /// otherwise `main` or `master` if a remote-tracking ref exists for it.
    pub fn default_branch(&self, remote_name: &str) -> Option<String> {
        let head_ref = format!("refs/remotes/{}/HEAD", remote_name);
        if let Ok(reference) = self.repo.find_reference(&head_ref) {
            let prefix = format!("refs/remotes/{}/", remote_name);
            if let Some(target) = reference.symbolic_target() {
                if let Some(name) = target.strip_prefix(&prefix) {
                    return Some(name.to_string());
                }
            }
        }

        ["main", "master"]
            .into_iter()
            .find(|name| {
                self.repo
                    .find_branch(&format!("{}/{}", remote_name, name), BranchType::Remote)
                    .is_ok()
            })
            .map(str::to_string)
    }

    /// Age of the HEAD commit in whole days.
    pub fn head_age_days(&self) -> Result<i64, GitError> {
        let commit = self.repo.head()?.peel_to_commit()?;
        let age_secs = Utc::now().timestamp() - commit.time().seconds();
        Ok(age_secs.max(0) / 86_400)
    }

    /// Return the SHA of HEAD.
    pub fn head_sha(&self) -> Result<String, GitError> {
        let commit = self.repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    /// Content of `path` (relative to the work tree) as committed at HEAD.
    /// `None` if HEAD is unborn, the file is not in the tree, or it is not
    /// UTF-8.
    pub fn head_file_content(&self, path: &Path) -> Result<Option<String>, GitError> {
        let Ok(head) = self.repo.head() else {
            return Ok(None);
        };
        let tree = head.peel_to_tree()?;
        let entry = match tree.get_path(path) {
            Ok(entry) => entry,
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let blob = entry.to_object(&self.repo)?.peel_to_blob()?;
        Ok(String::from_utf8(blob.content().to_vec()).ok())
    }

    /// Fetch from a named remote.
    #[instrument(skip(self))]
    pub fn fetch(&self, remote_name: &str) -> Result<(), GitError> {
        info!(remote = remote_name, "fetching");
        let mut remote = self.repo.find_remote(remote_name)?;
        let config = self.repo.config()?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(&config));
        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    /// Fetch, then fast-forward the current branch or create a merge commit.
    ///
    /// A merge that would conflict is refused with
    /// [`GitError::MergeConflict`]; nothing is written in that case.
    pub fn pull(&self, remote_name: &str) -> Result<PullOutcome, GitError> {
        self.pull_resolving(remote_name, |_| None)
    }

    /// Like [`pull`](Self::pull), but each conflicted text file is offered to
    /// `resolve`. Returning `Some(content)` stages that content for the
    /// merge commit. If any conflict is left unresolved the merge is refused
    /// and nothing is written.
    #[instrument(skip(self, resolve))]
    pub fn pull_resolving<F>(&self, remote_name: &str, mut resolve: F) -> Result<PullOutcome, GitError>
    where
        F: FnMut(&ConflictedFile) -> Option<String>,
    {
        let branch = self.current_branch().ok_or(GitError::DetachedHead)?;
        self.fetch(remote_name)?;

        let remote_ref = format!("refs/remotes/{}/{}", remote_name, branch);
        let reference = match self.repo.find_reference(&remote_ref) {
            Ok(r) => r,
            Err(_) => {
                debug!(%remote_ref, "no upstream branch");
                return Ok(PullOutcome::NoUpstream);
            }
        };
        let fetch_commit = self.repo.reference_to_annotated_commit(&reference)?;
        let (analysis, _) = self.repo.merge_analysis(&[&fetch_commit])?;

        if analysis.is_up_to_date() {
            debug!("already up to date");
            return Ok(PullOutcome::UpToDate);
        }

        let local_ref = format!("refs/heads/{}", branch);

        if analysis.is_fast_forward() {
            let target = self.repo.find_commit(fetch_commit.id())?;
            self.repo
                .checkout_tree(target.as_object(), Some(CheckoutBuilder::new().safe()))?;
            self.repo
                .find_reference(&local_ref)?
                .set_target(target.id(), "devsync: fast-forward pull")?;
            info!(sha = %target.id(), "fast-forwarded");
            return Ok(PullOutcome::FastForward);
        }

        let local_commit = self.repo.head()?.peel_to_commit()?;
        let remote_commit = self.repo.find_commit(fetch_commit.id())?;
        let mut index = self.repo.merge_commits(&local_commit, &remote_commit, None)?;

        if index.has_conflicts() {
            let conflicts: Vec<git2::IndexConflict> =
                index.conflicts()?.collect::<Result<_, _>>()?;
            let mut unresolved = Vec::new();
            let mut resolved = Vec::new();

            for conflict in conflicts {
                let Some(path) = conflict_path(&conflict) else {
                    continue;
                };
                let content = match self.conflicted_file(&path, &conflict)? {
                    Some(file) => resolve(&file),
                    None => None,
                };
                match (content, conflict.our) {
                    (Some(content), Some(entry)) => {
                        debug!(%path, "conflict resolved");
                        resolved.push((entry, conflict.ancestor.is_some(), content));
                    }
                    _ => unresolved.push(path),
                }
            }

            if !unresolved.is_empty() {
                warn!(paths = ?unresolved, "pull would conflict, leaving branch untouched");
                return Err(GitError::MergeConflict(unresolved));
            }

            for (mut entry, had_ancestor, content) in resolved {
                let path = PathBuf::from(String::from_utf8_lossy(&entry.path).into_owned());
                if had_ancestor {
                    index.remove(&path, 1)?;
                }
                index.remove(&path, 2)?;
                index.remove(&path, 3)?;

                entry.flags &= !INDEX_STAGE_MASK;
                entry.id = self.repo.blob(content.as_bytes())?;
                entry.file_size = u32::try_from(content.len()).unwrap_or(u32::MAX);
                index.add(&entry)?;
            }
        }

        let tree = self.repo.find_tree(index.write_tree_to(&self.repo)?)?;
        self.repo
            .checkout_tree(tree.as_object(), Some(CheckoutBuilder::new().safe()))?;

        let sig = self.signature()?;
        let message = format!("Merge {}/{} into {}", remote_name, branch, branch);
        let oid = self.repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &message,
            &tree,
            &[&local_commit, &remote_commit],
        )?;
        info!(sha = %oid, "created merge commit");
        Ok(PullOutcome::Merged(oid))
    }

    /// All three versions of a conflicted path, or `None` if one side deleted
    /// it or a version is not UTF-8.
    fn conflicted_file(
        &self,
        path: &str,
        conflict: &git2::IndexConflict,
    ) -> Result<Option<ConflictedFile>, GitError> {
        let (Some(our), Some(their)) = (&conflict.our, &conflict.their) else {
            return Ok(None);
        };
        let (Some(ours), Some(theirs)) = (self.blob_text(our.id)?, self.blob_text(their.id)?) else {
            return Ok(None);
        };
        let ancestor = match &conflict.ancestor {
            Some(entry) => self.blob_text(entry.id)?,
            None => None,
        };
        Ok(Some(ConflictedFile {
            path: PathBuf::from(path),
            ancestor,
            ours,
            theirs,
        }))
    }

    fn blob_text(&self, id: Oid) -> Result<Option<String>, GitError> {
        let blob = self.repo.find_blob(id)?;
        Ok(String::from_utf8(blob.content().to_vec()).ok())
    }

    /// Stage `paths` (relative to the work tree) and commit them.
    ///
    /// Returns `None` when staging leaves the tree identical to HEAD.
    #[instrument(skip(self, paths))]
    pub fn commit_paths(&self, paths: &[PathBuf], message: &str) -> Result<Option<Oid>, GitError> {
        let mut index = self.repo.index()?;
        for path in paths {
            index.add_path(path)?;
        }
        index.write()?;
        let tree_oid = index.write_tree()?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        if let Some(parent) = &parent {
            if parent.tree_id() == tree_oid {
                debug!("nothing to commit");
                return Ok(None);
            }
        }

        let tree = self.repo.find_tree(tree_oid)?;
        let sig = self.signature()?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        info!(sha = %oid, files = paths.len(), "created commit");
        Ok(Some(oid))
    }

    /// Commits on the current branch not on its remote counterpart, and
    /// the reverse. A missing remote branch counts every local commit.
    pub fn ahead_behind(&self, remote_name: &str) -> Result<(usize, usize), GitError> {
        let branch = self.current_branch().ok_or(GitError::DetachedHead)?;
        let local = self
            .repo
            .head()?
            .target()
            .ok_or_else(|| GitError::RefNotFound("HEAD".into()))?;

        let remote_ref = format!("refs/remotes/{}/{}", remote_name, branch);
        match self.repo.refname_to_id(&remote_ref) {
            Ok(upstream) => Ok(self.repo.graph_ahead_behind(local, upstream)?),
            Err(_) => {
                let mut revwalk = self.repo.revwalk()?;
                revwalk.push(local)?;
                Ok((revwalk.count(), 0))
            }
        }
    }

    /// Push a local branch to a remote.
    #[instrument(skip(self))]
    pub fn push(&self, remote_name: &str, branch: &str) -> Result<(), GitError> {
        info!(remote = remote_name, branch, "pushing");
        let mut remote = self.repo.find_remote(remote_name)?;
        let config = self.repo.config()?;
        let rejection: RefCell<Option<String>> = RefCell::new(None);

        {
            let mut callbacks = remote_callbacks(&config);
            callbacks.push_update_reference(|refname, status| {
                if let Some(msg) = status {
                    warn!(refname, msg, "push rejected");
                    *rejection.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut push_opts = PushOptions::new();
            push_opts.remote_callbacks(callbacks);
            let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);
            remote.push(&[&refspec], Some(&mut push_opts))?;
        }

        if let Some(detail) = rejection.into_inner() {
            return Err(GitError::PushRejected {
                branch: branch.to_string(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }

    /// Fetch, force-checkout `branch` and reset it to the remote's tip.
    /// Local changes in the work tree are discarded.
    #[instrument(skip(self))]
    pub fn switch_to_remote_branch(&self, remote_name: &str, branch: &str) -> Result<(), GitError> {
        self.fetch(remote_name)?;
        let remote_ref = format!("refs/remotes/{}/{}", remote_name, branch);
        let target = self
            .repo
            .find_reference(&remote_ref)
            .map_err(|_| GitError::RefNotFound(remote_ref.clone()))?
            .peel_to_commit()?;

        self.repo
            .checkout_tree(target.as_object(), Some(CheckoutBuilder::new().force()))?;
        self.repo.branch(branch, &target, true)?;
        self.repo.set_head(&format!("refs/heads/{}", branch))?;
        info!(branch, sha = %target.id(), "switched branch");
        Ok(())
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now(FALLBACK_AUTHOR.0, FALLBACK_AUTHOR.1)?),
        }
    }
}

fn conflict_path(conflict: &git2::IndexConflict) -> Option<String> {
    conflict
        .our
        .as_ref()
        .or(conflict.their.as_ref())
        .or(conflict.ancestor.as_ref())
        .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
}

/// Callbacks that try the SSH agent, the credential helper, then default
/// credentials, giving up after a few rounds.
fn remote_callbacks(config: &git2::Config) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0usize;
    callbacks.credentials(move |url, username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("authentication failed"));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            if let Some(user) = username_from_url {
                return Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            return Cred::credential_helper(config, url, username_from_url);
        }
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(username_from_url.unwrap_or("git"));
        }
        Cred::default()
    });
    callbacks
}
