//! devsync core library.
//!
//! This crate provides the building blocks of the `dev` workflow tool: the
//! `repos.json` registry, tracked-repository bookkeeping, git operations, and
//! the instructions-document sync engine (conflict detection, three-way and
//! section merging, and the capture/apply coordinator).

pub mod config;
pub mod config_repo;
pub mod conflict;
pub mod document;
pub mod errors;
pub mod git;
pub mod instructions;
pub mod workspace;

// Re-exports for convenience.
pub use config::RepoConfig;
pub use config_repo::{run_cycle, CycleReport};
pub use document::Document;
pub use errors::CoreError;
pub use instructions::{CapturePolicy, InstructionsSync, PairState, PulledMerge, SyncStatus};
