//! The snapshot plan: which contracts to scan and how to split the rewards.
//!
//! ```json
//! {
//!   "registry": { "address": "0xe55c…", "deployment_block": 2000000 },
//!   "tokens": [
//!     { "name": "cUSD", "address": "0x765d…", "donations": true },
//!     { "name": "CELO", "address": "0x471e…", "donations": true, "holders": true }
//!   ],
//!   "denylist": ["0x0000000000000000000000000000000000000000"],
//!   "aliases": { "0xold…": "0xnew…" },
//!   "pools": { "donors": 700.0, "holders": 300.0 }
//! }
//! ```

use alloy_primitives::Address;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AirdropPlan {
    pub registry: RegistryPlan,
    pub tokens: Vec<TokenPlan>,
    #[serde(default)]
    pub denylist: BTreeSet<Address>,
    /// Deprecated community contract to successor, on top of the on-chain
    /// migrations.
    #[serde(default)]
    pub aliases: BTreeMap<Address, Address>,
    #[serde(default)]
    pub pools: PoolBudgets,
}

/// The community registry emitting `CommunityAdded`/`CommunityMigrated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryPlan {
    pub address: Address,
    pub deployment_block: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenPlan {
    /// Checkpoint tag for the token's transfer artifacts.
    pub name: String,
    pub address: Address,
    pub start_block: Option<u64>,
    /// Count transfers into communities as donations.
    #[serde(default)]
    pub donations: bool,
    /// Feed balances into the holders pool.
    #[serde(default)]
    pub holders: bool,
}

/// Token budget per reward pool; a zero budget disables the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolBudgets {
    #[serde(default)]
    pub donors: f64,
    #[serde(default)]
    pub holders: f64,
    #[serde(default)]
    pub managers: f64,
    #[serde(default)]
    pub beneficiaries: f64,
}

impl PoolBudgets {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> {
        [
            ("donors", self.donors),
            ("holders", self.holders),
            ("managers", self.managers),
            ("beneficiaries", self.beneficiaries),
        ]
        .into_iter()
    }

    pub fn total(&self) -> f64 {
        self.iter().map(|(_, budget)| budget).sum()
    }
}

impl AirdropPlan {
    pub fn from_json(raw: &str) -> Result<Self> {
        let plan: Self = serde_json::from_str(raw).context("failed to parse airdrop plan")?;
        plan.validate()?;
        Ok(plan)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read airdrop plan {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid airdrop plan {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tokens.is_empty() {
            bail!("tokens cannot be empty");
        }

        let mut names = BTreeSet::new();
        for token in &self.tokens {
            let name = token.name.trim();
            if name.is_empty() {
                bail!("token name cannot be empty");
            }
            if name.contains(['.', '/', '\\']) {
                bail!("token name {name:?} cannot contain '.', '/' or '\\'");
            }
            if !names.insert(name) {
                bail!("token name {name:?} is used twice");
            }
        }

        for (pool, budget) in self.pools.iter() {
            if !budget.is_finite() || budget < 0.0 {
                bail!("pools.{pool} must be a finite, non-negative budget");
            }
        }
        if self.pools.total() <= 0.0 {
            bail!("pools must assign a positive budget to at least one pool");
        }

        Ok(())
    }

    pub fn donation_tokens(&self) -> impl Iterator<Item = &TokenPlan> {
        self.tokens.iter().filter(|token| token.donations)
    }

    pub fn holder_tokens(&self) -> impl Iterator<Item = &TokenPlan> {
        self.tokens.iter().filter(|token| token.holders)
    }
}
