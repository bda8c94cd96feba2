//! Error types for the devsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.
//!
//! Merge-level problems (an unavailable line-merge backend, conflicting
//! edits) are deliberately absent: they are contained inside the sync
//! coordinator and surface as a [`crate::instructions::SyncStatus`].

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Git(#[from] GitError),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Hard failures of an instructions sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Reading or writing one side of the document pair failed.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not valid UTF-8 text.
    #[error("'{}' is not valid UTF-8 text", path.display())]
    NotUtf8 { path: PathBuf },
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from loading, validating and saving the registry file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON parse error.
    #[error("configuration parse error in '{}': {detail}", path.display())]
    ParseError { path: PathBuf, detail: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// An operating system name outside linux/darwin/windows.
    #[error("unknown OS '{0}': must be linux, darwin, or windows")]
    UnknownOs(String),

    /// No configuration directory was given and none could be derived.
    #[error("could not determine a configuration directory; pass --config-dir")]
    NoConfigDir,

    /// Generic I/O error reading or writing the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

/// Errors from tracked-repository bookkeeping.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The path to add does not exist.
    #[error("directory does not exist: {}", .0.display())]
    PathNotFound(PathBuf),

    /// The path exists but has no `.git` entry.
    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    /// No tracked repository has this name.
    #[error("repository '{0}' is not tracked")]
    NotTracked(String),

    /// Generic I/O error while scanning.
    #[error("registry I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from local Git (git2) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The path is not inside a git repository.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, remote-tracking ref) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// HEAD is detached or unborn where a branch was required.
    #[error("HEAD is not on a branch")]
    DetachedHead,

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// Merge conflict detected while pulling.
    #[error("git merge conflict in: {}", .0.join(", "))]
    MergeConflict(Vec<String>),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
