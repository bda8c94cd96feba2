//! Conflict detection and document merging.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- finding unresolved merge markers outside code.
//! 2. **Three-way merging** -- line merge over a reconstructed ancestor.
//! 3. **Section merging** -- header-level fallback that always succeeds.
//! 4. **Strategy selection** -- trying the mergers in order.

pub mod detector;
pub mod merger;
pub mod section;
pub mod strategy;

pub use detector::{has_real_conflict_markers, ConflictDetector, ConflictRegion};
pub use merger::{LineMergeBackend, MergeResult, ThreeWayMerger};
pub use section::SectionMerger;
pub use strategy::{MergePipeline, MergeStrategy, PipelineOutcome};
