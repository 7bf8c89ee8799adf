//! Multi-pool reward allocation.
//!
//! Each pool spends its budget over its own qualifying addresses, either in
//! proportion to a weight or in equal shares. Per-address results are summed
//! across pools and emitted sorted ascending by amount (ties by address),
//! together with the amount scaled to 18-decimal integers.

use crate::contributions::Contribution;
use crate::error::HarvestError;
use crate::units;
use alloy_primitives::Address;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub enum PoolRule {
    /// `weight × budget / Σ weights` per address.
    Proportional(Vec<(Address, f64)>),
    /// `budget / count` per address.
    EqualSplit(BTreeSet<Address>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewardPool {
    pub name: String,
    pub budget: f64,
    pub rule: PoolRule,
}

impl RewardPool {
    pub fn proportional<I>(name: impl Into<String>, budget: f64, weights: I) -> Self
    where
        I: IntoIterator<Item = (Address, f64)>,
    {
        Self {
            name: name.into(),
            budget,
            rule: PoolRule::Proportional(weights.into_iter().collect()),
        }
    }

    /// Proportional pool weighted by contribution amounts.
    pub fn from_contributions(
        name: impl Into<String>,
        budget: f64,
        contributions: &[Contribution],
    ) -> Self {
        Self::proportional(
            name,
            budget,
            contributions.iter().map(|c| (c.address, c.amount)),
        )
    }

    pub fn equal_split<I>(name: impl Into<String>, budget: f64, addresses: I) -> Self
    where
        I: IntoIterator<Item = Address>,
    {
        Self {
            name: name.into(),
            budget,
            rule: PoolRule::EqualSplit(addresses.into_iter().collect()),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> anyhow::Error {
        HarvestError::InvalidPool {
            pool: self.name.clone(),
            reason: reason.into(),
        }
        .into()
    }

    fn empty(&self) -> anyhow::Error {
        HarvestError::EmptyPool {
            pool: self.name.clone(),
        }
        .into()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub address: Address,
    /// Decimal token amount.
    pub amount: f64,
    /// `floor(amount × 10^18)`.
    pub scaled: u128,
}

/// Final allocation, sorted ascending by amount then address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Distribution {
    entries: Vec<Allocation>,
}

impl Distribution {
    fn from_totals(totals: BTreeMap<Address, f64>) -> Self {
        let mut entries: Vec<Allocation> = totals
            .into_iter()
            .map(|(address, amount)| Allocation {
                address,
                amount,
                scaled: units::to_atomic(amount),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.amount
                .total_cmp(&b.amount)
                .then_with(|| a.address.cmp(&b.address))
        });
        Self { entries }
    }

    pub fn entries(&self) -> &[Allocation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.amount).sum()
    }

    pub fn get(&self, address: &Address) -> Option<&Allocation> {
        self.entries.iter().find(|e| &e.address == address)
    }

    /// Entries re-keyed by address (the order of the JSON output).
    pub fn by_address(&self) -> BTreeMap<Address, &Allocation> {
        self.entries.iter().map(|e| (e.address, e)).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewardAllocator {
    denylist: BTreeSet<Address>,
}

impl RewardAllocator {
    pub fn new(denylist: BTreeSet<Address>) -> Self {
        Self { denylist }
    }

    pub fn denylist(&self) -> &BTreeSet<Address> {
        &self.denylist
    }

    /// Allocates every pool and merges the results additively.
    pub fn allocate(&self, pools: &[RewardPool]) -> Result<Distribution> {
        let mut totals: BTreeMap<Address, f64> = BTreeMap::new();
        for pool in pools {
            let shares = self.allocate_pool(pool)?;
            tracing::debug!(
                pool = %pool.name,
                budget = pool.budget,
                recipients = shares.len(),
                "pool allocated"
            );
            for (address, amount) in shares {
                *totals.entry(address).or_insert(0.0) += amount;
            }
        }
        Ok(Distribution::from_totals(totals))
    }

    /// Per-address amounts of a single pool.
    pub fn allocate_pool(&self, pool: &RewardPool) -> Result<BTreeMap<Address, f64>> {
        if !pool.budget.is_finite() || pool.budget < 0.0 {
            return Err(pool.invalid(format!(
                "budget must be finite and non-negative, got {}",
                pool.budget
            )));
        }

        match &pool.rule {
            PoolRule::Proportional(weights) => {
                let mut merged: BTreeMap<Address, f64> = BTreeMap::new();
                for (address, weight) in weights {
                    if !weight.is_finite() {
                        return Err(pool.invalid(format!("weight of {address} is not finite")));
                    }
                    if *weight < 0.0 {
                        return Err(pool.invalid(format!("weight of {address} is negative")));
                    }
                    if self.denylist.contains(address) {
                        continue;
                    }
                    *merged.entry(*address).or_insert(0.0) += weight;
                }

                let total: f64 = merged.values().sum();
                if total <= 0.0 {
                    return Err(pool.empty());
                }
                let multiplier = pool.budget / total;

                Ok(merged
                    .into_iter()
                    .map(|(address, weight)| (address, weight * multiplier))
                    .filter(|(_, amount)| *amount != 0.0)
                    .collect())
            }
            PoolRule::EqualSplit(addresses) => {
                let eligible: Vec<&Address> = addresses
                    .iter()
                    .filter(|address| !self.denylist.contains(*address))
                    .collect();
                if eligible.is_empty() {
                    return Err(pool.empty());
                }
                let share = pool.budget / eligible.len() as f64;
                Ok(eligible
                    .into_iter()
                    .map(|address| (*address, share))
                    .collect())
            }
        }
    }
}

/// One-shot form of [`RewardAllocator::allocate`].
pub fn allocate(pools: &[RewardPool], denylist: &BTreeSet<Address>) -> Result<Distribution> {
    RewardAllocator::new(denylist.clone()).allocate(pools)
}
