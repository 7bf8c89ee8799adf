//! Error taxonomy shared by the harvester, the checkpoint store, and the
//! allocation stages.
//!
//! Functions return `anyhow::Result` and attach context as errors travel up;
//! code that needs to react to a specific failure (the shrink/retry policy,
//! tests) classifies with `err.downcast_ref::<HarvestError>()`.

use crate::checkpoint::range::BlockRange;
use alloy_primitives::Address;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    /// Zero-width or reversed block interval.
    #[error("invalid block range {from}..={to}: the target block must be above the start block")]
    InvalidRange { from: u64, to: u64 },

    /// The fetch primitive timed out; recovered locally by shrinking the request span.
    #[error("log fetch timed out for blocks {range}")]
    TransientFetch { range: BlockRange },

    /// Too many counted fetch failures within a single harvest run.
    #[error("harvest aborted after {errors} fetch errors")]
    FetchAborted {
        errors: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Allocation over a pool with no qualifying weight.
    #[error("reward pool {pool} has no qualifying amount to allocate over")]
    EmptyPool { pool: String },

    #[error("reward pool {pool} is invalid: {reason}")]
    InvalidPool { pool: String, reason: String },

    /// A checkpoint artifact exists but cannot be decoded.
    #[error("checkpoint artifact {} is corrupt", path.display())]
    CheckpointCorruption {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("balance of {address} overflowed while replaying transfers")]
    BalanceOverflow { address: Address },
}

impl HarvestError {
    /// Returns `true` for failures that the shrink policy recovers from.
    pub fn is_transient(&self) -> bool {
        matches!(self, HarvestError::TransientFetch { .. })
    }
}

/// Classifies an arbitrary error chain as a transient fetch failure.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<HarvestError>()
        .map(HarvestError::is_transient)
        .unwrap_or(false)
}
