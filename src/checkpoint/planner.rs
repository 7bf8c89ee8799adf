use super::range::BlockRange;
use super::store::CheckpointStore;
use anyhow::Result;
use std::path::PathBuf;

/// Default number of blocks per checkpoint chunk.
pub const DEFAULT_STEP_SIZE: u64 = 100_000;

/// Work left for one `(tag, kind)` scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestPlan {
    /// Chunks without an artifact, ascending.
    pub pending: Vec<BlockRange>,
    /// Every chunk of the scan (covered or pending) with its artifact path,
    /// ascending and non-overlapping.
    pub artifacts: Vec<(BlockRange, PathBuf)>,
}

impl HarvestPlan {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn covered(&self) -> impl Iterator<Item = &BlockRange> {
        self.artifacts
            .iter()
            .map(|(range, _)| range)
            .filter(|range| !self.pending.contains(range))
    }
}

/// Computes the chunks that still need fetching from the artifacts on disk.
#[derive(Debug, Clone, Copy)]
pub struct RangePlanner {
    step: u64,
}

impl Default for RangePlanner {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_SIZE)
    }
}

impl RangePlanner {
    pub fn new(step: u64) -> Self {
        Self { step: step.max(1) }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Plans a scan of `[from, to]` against the artifacts already in `store`.
    pub async fn plan_with_store(
        &self,
        from: u64,
        to: u64,
        store: &CheckpointStore,
    ) -> Result<HarvestPlan> {
        let existing = store.list().await?;
        self.plan(from, to, &existing, |range| store.artifact_path(range))
    }

    /// Pure planning step.
    ///
    /// `existing` holds the ranges (and paths) of artifacts found on disk, in
    /// any order. Artifacts that reach outside `[from, to]`, or overlap an
    /// artifact already selected, do not count as coverage. Every gap is split
    /// into chunks of at most `step` blocks and named with `path_for`.
    pub fn plan<F>(
        &self,
        from: u64,
        to: u64,
        existing: &[(BlockRange, PathBuf)],
        path_for: F,
    ) -> Result<HarvestPlan>
    where
        F: Fn(BlockRange) -> PathBuf,
    {
        let span = BlockRange::span(from, to)?;

        let mut candidates: Vec<&(BlockRange, PathBuf)> = existing
            .iter()
            .filter(|(range, _)| range.from() >= span.from() && range.to() <= span.to())
            .collect();
        candidates.sort_by_key(|(range, _)| (range.from(), std::cmp::Reverse(range.to())));

        let mut pending = Vec::new();
        let mut artifacts = Vec::new();
        // First block not yet covered.
        let mut cursor = span.from();
        let mut exhausted = false;

        for (range, path) in candidates {
            if exhausted || range.from() < cursor {
                tracing::debug!(
                    artifact = %path.display(),
                    "skipping overlapping checkpoint artifact"
                );
                continue;
            }
            if range.from() > cursor {
                let gap = BlockRange::new(cursor, range.from() - 1)?;
                self.push_gap(gap, &mut pending, &mut artifacts, &path_for);
            }
            artifacts.push((*range, path.clone()));
            match range.to().checked_add(1) {
                Some(next) => cursor = next,
                None => exhausted = true,
            }
        }

        if !exhausted && cursor <= span.to() {
            let gap = BlockRange::new(cursor, span.to())?;
            self.push_gap(gap, &mut pending, &mut artifacts, &path_for);
        }

        Ok(HarvestPlan { pending, artifacts })
    }

    fn push_gap<F>(
        &self,
        gap: BlockRange,
        pending: &mut Vec<BlockRange>,
        artifacts: &mut Vec<(BlockRange, PathBuf)>,
        path_for: &F,
    ) where
        F: Fn(BlockRange) -> PathBuf,
    {
        for chunk in gap.split(self.step) {
            pending.push(chunk);
            artifacts.push((chunk, path_for(chunk)));
        }
    }
}
