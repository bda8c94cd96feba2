//! Pluggable merge strategies.
//!
//! A [`MergePipeline`] tries each [`MergeStrategy`] in order and returns the
//! first result. The three-way merger declines when it cannot reconstruct a
//! usable ancestor or its backend is unavailable; the section merger never
//! declines, so a pipeline ending in it always yields a result.

use tracing::{debug, warn};

use super::merger::{LineMergeBackend, MergeResult, ThreeWayMerger};
use super::section::SectionMerger;
use crate::document::Document;

/// One way of reconciling a canonical/workspace pair.
pub trait MergeStrategy {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Merge the pair, or `None` if this strategy is unavailable for it.
    fn merge(&self, canonical: &Document, workspace: &Document) -> Option<MergeResult>;

    /// Merge with a known common ancestor. Strategies that cannot use one
    /// ignore it.
    fn merge_with_ancestor(
        &self,
        _ancestor: &Document,
        canonical: &Document,
        workspace: &Document,
    ) -> Option<MergeResult> {
        self.merge(canonical, workspace)
    }
}

impl MergeStrategy for ThreeWayMerger {
    fn name(&self) -> &'static str {
        "three-way"
    }

    fn merge(&self, canonical: &Document, workspace: &Document) -> Option<MergeResult> {
        self.three_way_merge(canonical, workspace)
    }

    fn merge_with_ancestor(
        &self,
        ancestor: &Document,
        canonical: &Document,
        workspace: &Document,
    ) -> Option<MergeResult> {
        self.three_way_merge_with_base(ancestor, canonical, workspace)
    }
}

impl MergeStrategy for SectionMerger {
    fn name(&self) -> &'static str {
        "section"
    }

    fn merge(&self, canonical: &Document, workspace: &Document) -> Option<MergeResult> {
        Some(SectionMerger::section_merge(canonical, workspace))
    }
}

/// A merge result together with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub strategy: &'static str,
    pub result: MergeResult,
}

/// Ordered list of strategies, tried first to last.
pub struct MergePipeline {
    strategies: Vec<Box<dyn MergeStrategy>>,
}

impl MergePipeline {
    pub fn new(strategies: Vec<Box<dyn MergeStrategy>>) -> Self {
        Self { strategies }
    }

    /// Three-way merge with the given backend, falling back to section merge.
    pub fn with_backend(backend: LineMergeBackend) -> Self {
        Self::new(vec![
            Box::new(ThreeWayMerger::new(backend)),
            Box::new(SectionMerger),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the pipeline. Always returns a result: if every configured
    /// strategy declines, the section merger is used.
    pub fn run(&self, canonical: &Document, workspace: &Document) -> PipelineOutcome {
        self.run_with_ancestor(None, canonical, workspace)
    }

    /// Like [`run`](Self::run), handing `ancestor` to strategies that can use it.
    pub fn run_with_ancestor(
        &self,
        ancestor: Option<&Document>,
        canonical: &Document,
        workspace: &Document,
    ) -> PipelineOutcome {
        for strategy in &self.strategies {
            let result = match ancestor {
                Some(ancestor) => strategy.merge_with_ancestor(ancestor, canonical, workspace),
                None => strategy.merge(canonical, workspace),
            };
            match result {
                Some(result) => {
                    debug!(
                        strategy = strategy.name(),
                        conflicts = result.has_conflicts,
                        "merge strategy produced a result"
                    );
                    return PipelineOutcome {
                        strategy: strategy.name(),
                        result,
                    };
                }
                None => debug!(strategy = strategy.name(), "merge strategy unavailable"),
            }
        }

        warn!("no configured merge strategy applied, using section merge");
        PipelineOutcome {
            strategy: SectionMerger.name(),
            result: SectionMerger::section_merge(canonical, workspace),
        }
    }
}

impl Default for MergePipeline {
    fn default() -> Self {
        Self::with_backend(LineMergeBackend::Builtin)
    }
}

impl std::fmt::Debug for MergePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergePipeline")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}
