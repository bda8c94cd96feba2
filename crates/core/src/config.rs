//! The `repos.json` registry.
//!
//! One JSON file in the config directory lists every tracked repository, the
//! workspace base path per operating system, the instructions documents to
//! keep in sync, and sync tuning knobs. Keys are camelCase. A missing file is
//! created with defaults on first load.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conflict::{LineMergeBackend, MergePipeline};
use crate::errors::{ConfigError, RegistryError};
use crate::instructions::{CapturePolicy, InstructionsSync};

/// File name of the registry inside the config directory.
pub const CONFIG_FILE_NAME: &str = "repos.json";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "DEV_CONFIG_DIR";

const CURRENT_VERSION: u32 = 1;
const FALLBACK_BASE_PATH: &str = "/workspace";

// ---------------------------------------------------------------------------
// Operating system
// ---------------------------------------------------------------------------

/// Operating systems with their own workspace base path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsType {
    Linux,
    Darwin,
    Windows,
}

impl OsType {
    pub const ALL: [OsType; 3] = [OsType::Linux, OsType::Darwin, OsType::Windows];

    /// The OS this binary runs on. Anything unrecognised is treated as Linux.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Self::Darwin,
            "windows" => Self::Windows,
            _ => Self::Linux,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "darwin" | "macos" => Ok(Self::Darwin),
            "windows" => Ok(Self::Windows),
            _ => Err(ConfigError::UnknownOs(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry entries
// ---------------------------------------------------------------------------

/// A repository tracked across machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedRepo {
    /// Path relative to the base path, e.g. `edge/src` or `tools`.
    pub name: String,

    /// `origin` URL used to clone the repo on other machines.
    #[serde(default)]
    pub remote_url: String,

    /// Absolute path the repo was registered from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
}

impl TrackedRepo {
    /// Where this repo lives under `base_path`.
    pub fn target_path(&self, base_path: &Path) -> PathBuf {
        self.name
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(base_path.to_path_buf(), |path, part| path.join(part))
    }
}

/// One canonical/workspace pair of an instructions document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionsDoc {
    /// Relative to the config directory.
    pub canonical: PathBuf,
    /// Relative to the workspace base path.
    pub workspace: PathBuf,
}

impl InstructionsDoc {
    pub fn new(canonical: impl Into<PathBuf>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            canonical: canonical.into(),
            workspace: workspace.into(),
        }
    }

    /// Display name (the canonical file name).
    pub fn name(&self) -> String {
        self.canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.canonical.display().to_string())
    }
}

/// Which line-merge primitive the three-way merger uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LineMergeKind {
    #[default]
    Builtin,
    GitMergeFile,
}

/// Sync behaviour options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    #[serde(default)]
    pub capture_policy: CapturePolicy,

    #[serde(default)]
    pub line_merge: LineMergeKind,

    /// Upper bound on an external merge process (default 10).
    #[serde(default = "default_merge_timeout_secs")]
    pub merge_timeout_secs: u64,

    /// Branches whose HEAD commit is older than this are offered a switch
    /// back to the default branch (default 14).
    #[serde(default = "default_stale_branch_days")]
    pub stale_branch_days: u64,
}

fn default_merge_timeout_secs() -> u64 {
    10
}

fn default_stale_branch_days() -> u64 {
    14
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            capture_policy: CapturePolicy::default(),
            line_merge: LineMergeKind::default(),
            merge_timeout_secs: default_merge_timeout_secs(),
            stale_branch_days: default_stale_branch_days(),
        }
    }
}

impl SyncSettings {
    pub fn line_merge_backend(&self) -> LineMergeBackend {
        match self.line_merge {
            LineMergeKind::Builtin => LineMergeBackend::Builtin,
            LineMergeKind::GitMergeFile => LineMergeBackend::GitMergeFile {
                timeout: Duration::from_secs(self.merge_timeout_secs),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level registry
// ---------------------------------------------------------------------------

/// Contents of `repos.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_description")]
    pub description: String,

    /// Workspace base path keyed by OS name.
    #[serde(default = "default_base_paths")]
    pub default_base_paths: BTreeMap<String, String>,

    #[serde(default)]
    pub repos: Vec<TrackedRepo>,

    #[serde(default = "default_instructions")]
    pub instructions: Vec<InstructionsDoc>,

    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_description() -> String {
    "Tracked repositories for cross-machine sync".into()
}

fn default_base_paths() -> BTreeMap<String, String> {
    BTreeMap::from([
        (OsType::Linux.to_string(), FALLBACK_BASE_PATH.to_string()),
        (OsType::Darwin.to_string(), FALLBACK_BASE_PATH.to_string()),
        (OsType::Windows.to_string(), r"C:\dev".to_string()),
    ])
}

fn default_instructions() -> Vec<InstructionsDoc> {
    vec![
        InstructionsDoc::new("copilot-instructions.md", ".github/copilot-instructions.md"),
        InstructionsDoc::new("CLAUDE.md", ".claude/CLAUDE.md"),
    ]
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            description: default_description(),
            default_base_paths: default_base_paths(),
            repos: Vec::new(),
            instructions: default_instructions(),
            sync: SyncSettings::default(),
        }
    }
}

impl RepoConfig {
    /// Path of the registry file inside `config_dir`.
    pub fn file_path(config_dir: &Path) -> PathBuf {
        config_dir.join(CONFIG_FILE_NAME)
    }

    /// Parse and validate a registry file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading registry");

        let contents = std::fs::read_to_string(path)?;
        let config: RepoConfig =
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the registry from `config_dir`, writing a default one first if
    /// none exists.
    pub fn load_or_init(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::file_path(config_dir);
        if !path.exists() {
            info!(path = %path.display(), "no registry found, creating default");
            let config = Self::default();
            config.save(config_dir)?;
            return Ok(config);
        }
        Self::load_from_file(&path)
    }

    /// Write the registry as pretty-printed JSON.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir)?;
        let path = Self::file_path(config_dir);
        let mut json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        json.push('\n');
        std::fs::write(&path, json)?;
        debug!(path = %path.display(), repos = self.repos.len(), "registry saved");
        Ok(())
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (idx, repo) in self.repos.iter().enumerate() {
            if repo.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("repos[{}].name", idx),
                    detail: "repository name must not be empty".into(),
                });
            }
            if self.repos[..idx].iter().any(|r| r.name == repo.name) {
                return Err(ConfigError::InvalidValue {
                    field: format!("repos[{}].name", idx),
                    detail: format!("duplicate repository name '{}'", repo.name),
                });
            }
        }

        for (idx, doc) in self.instructions.iter().enumerate() {
            for (field, path) in [("canonical", &doc.canonical), ("workspace", &doc.workspace)] {
                if !is_plain_relative(path) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("instructions[{}].{}", idx, field),
                        detail: format!(
                            "'{}' must be a relative path without '..'",
                            path.display()
                        ),
                    });
                }
            }
        }

        if self.sync.merge_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.mergeTimeoutSecs".into(),
                detail: "merge timeout must be > 0".into(),
            });
        }

        for key in self.default_base_paths.keys() {
            key.parse::<OsType>()?;
        }

        Ok(())
    }

    /// Workspace base path for `os`.
    pub fn base_path(&self, os: OsType) -> PathBuf {
        let raw = self
            .default_base_paths
            .get(os.as_str())
            .map(String::as_str)
            .unwrap_or(FALLBACK_BASE_PATH);
        expand_tilde(raw)
    }

    pub fn set_base_path(&mut self, os: OsType, path: &str) {
        self.default_base_paths
            .insert(os.to_string(), path.to_string());
    }

    pub fn find_repo(&self, name: &str) -> Option<&TrackedRepo> {
        self.repos.iter().find(|r| r.name == name)
    }

    /// Insert `repo`, replacing an entry with the same name. Returns `true`
    /// if an existing entry was replaced.
    pub fn upsert_repo(&mut self, repo: TrackedRepo) -> bool {
        match self.repos.iter_mut().find(|r| r.name == repo.name) {
            Some(existing) => {
                *existing = repo;
                true
            }
            None => {
                self.repos.push(repo);
                false
            }
        }
    }

    pub fn remove_repo(&mut self, name: &str) -> Result<TrackedRepo, RegistryError> {
        let idx = self
            .repos
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| RegistryError::NotTracked(name.to_string()))?;
        Ok(self.repos.remove(idx))
    }

    /// Canonical path of `doc` inside `config_dir`.
    pub fn canonical_path(config_dir: &Path, doc: &InstructionsDoc) -> PathBuf {
        config_dir.join(&doc.canonical)
    }

    /// Build a coordinator for `doc` with this registry's sync settings.
    pub fn instructions_sync(
        &self,
        doc: &InstructionsDoc,
        config_dir: &Path,
        base_path: &Path,
    ) -> InstructionsSync {
        InstructionsSync::new(
            Self::canonical_path(config_dir, doc),
            base_path.join(&doc.workspace),
        )
        .with_policy(self.sync.capture_policy)
        .with_pipeline(MergePipeline::with_backend(self.sync.line_merge_backend()))
    }
}

fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

// ---------------------------------------------------------------------------
// Config directory
// ---------------------------------------------------------------------------

/// Pick the config directory: explicit value, then `DEV_CONFIG_DIR`, then
/// the platform config dir (`~/.config/devsync` on Linux).
pub fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = explicit {
        return Ok(expand_tilde(&dir.to_string_lossy()));
    }
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(expand_tilde(&dir));
        }
    }
    dirs::config_dir()
        .map(|d| d.join("devsync"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
