use crate::error::HarvestError;
use anyhow::Result;
use std::fmt;

/// Inclusive, non-empty interval of block numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRange {
    from: u64,
    to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Result<Self> {
        if to < from {
            return Err(HarvestError::InvalidRange { from, to }.into());
        }
        Ok(Self { from, to })
    }

    /// Validates a requested scan span, which must cover at least two blocks.
    pub fn span(from: u64, to: u64) -> Result<Self> {
        if to <= from {
            return Err(HarvestError::InvalidRange { from, to }.into());
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> u64 {
        self.from
    }

    pub fn to(&self) -> u64 {
        self.to
    }

    /// Number of blocks in the range.
    pub fn len(&self) -> u64 {
        (self.to - self.from).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }

    /// Splits the range into consecutive ranges of at most `step` blocks.
    pub fn split(&self, step: u64) -> Vec<BlockRange> {
        let step = step.max(1);
        let mut chunks = Vec::with_capacity(self.len().div_ceil(step) as usize);
        let mut start = self.from;
        loop {
            let end = start.saturating_add(step - 1).min(self.to);
            chunks.push(BlockRange {
                from: start,
                to: end,
            });
            if end >= self.to {
                break;
            }
            start = end + 1;
        }
        chunks
    }

    /// Leading window of at most `span` blocks.
    pub fn window(&self, span: u64) -> BlockRange {
        let span = span.max(1);
        BlockRange {
            from: self.from,
            to: self.from.saturating_add(span - 1).min(self.to),
        }
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}
