//! Git operations for tracked repositories and the config repository.

pub mod client;

pub use client::{ConflictedFile, GitClient, PullOutcome};
