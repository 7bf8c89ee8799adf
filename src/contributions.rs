//! Contributor extraction: donors, role holders and beneficiaries, with
//! deprecated community contracts remapped to their successors.

use crate::events::{EventRecord, TransferEvent};
use crate::units;
use alloy_primitives::Address;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Donor,
    Holder,
    Manager,
    Beneficiary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::Donor => "donor",
            Role::Holder => "holder",
            Role::Manager => "manager",
            Role::Beneficiary => "beneficiary",
        };
        f.write_str(label)
    }
}

/// Decimal amount credited to an address under a role.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub address: Address,
    pub amount: f64,
    pub role: Role,
}

/// Holder balances of a single token. Balances of different tokens are
/// never added together.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenHolders {
    pub token: String,
    pub holders: Vec<Contribution>,
}

impl TokenHolders {
    pub fn new(token: impl Into<String>, balances: BTreeMap<Address, f64>) -> Self {
        Self {
            token: token.into(),
            holders: balances
                .into_iter()
                .map(|(address, amount)| Contribution {
                    address,
                    amount,
                    role: Role::Holder,
                })
                .collect(),
        }
    }

    /// Distinct holder addresses across `tokens`.
    pub fn unique_addresses(tokens: &[TokenHolders]) -> BTreeSet<Address> {
        tokens
            .iter()
            .flat_map(|token| token.holders.iter().map(|h| h.address))
            .collect()
    }
}

/// `deprecated -> successor` address remapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    aliases: BTreeMap<Address, Address>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map from `CommunityMigrated` records; other records are ignored.
    pub fn from_migrations<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a EventRecord>,
    {
        let mut map = Self::new();
        for record in records {
            if let EventRecord::CommunityMigrated(migration) = record {
                map.insert(migration.previous, migration.address);
            }
        }
        map
    }

    pub fn insert(&mut self, deprecated: Address, successor: Address) {
        if deprecated != successor {
            self.aliases.insert(deprecated, successor);
        }
    }

    pub fn extend(&mut self, other: &AliasMap) {
        for (deprecated, successor) in &other.aliases {
            self.insert(*deprecated, *successor);
        }
    }

    /// Whether `address` has a successor.
    pub fn is_deprecated(&self, address: &Address) -> bool {
        self.aliases.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Follows the alias chain from `address` to its final successor.
    ///
    /// A cycle stops at the last address before it would repeat.
    pub fn resolve(&self, address: Address) -> Address {
        let mut current = address;
        let mut seen = BTreeSet::from([address]);
        while let Some(next) = self.aliases.get(&current) {
            if !seen.insert(*next) {
                break;
            }
            current = *next;
        }
        current
    }
}

/// Credits senders of transfers that land on a community.
///
/// Only the receiving end goes through `aliases`, so a donation to a
/// deprecated contract counts for its successor. Transfers sent by a
/// community contract (live, deprecated or listed in `communities`) are
/// treasury moves such as migrations and never count. Donations are summed
/// per sender; the result is sorted by address.
pub fn extract_donors<'a, I>(
    transfers: I,
    communities: &BTreeSet<Address>,
    aliases: &AliasMap,
) -> Vec<Contribution>
where
    I: IntoIterator<Item = &'a TransferEvent>,
{
    let live: BTreeSet<Address> = communities.iter().map(|c| aliases.resolve(*c)).collect();
    let is_community = |address: &Address| {
        communities.contains(address) || live.contains(address) || aliases.is_deprecated(address)
    };
    let mut donated: BTreeMap<Address, u128> = BTreeMap::new();

    for transfer in transfers {
        if !live.contains(&aliases.resolve(transfer.to)) || is_community(&transfer.from) {
            continue;
        }
        let total = donated.entry(transfer.from).or_insert(0);
        *total = total.saturating_add(transfer.value);
    }

    donated
        .into_iter()
        .map(|(address, atomic)| Contribution {
            address,
            amount: units::to_decimal(atomic),
            role: Role::Donor,
        })
        .collect()
}

/// Distinct subject addresses of `records`, sorted.
pub fn extract_unique_addresses<'a, I>(records: I) -> BTreeSet<Address>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    records.into_iter().map(EventRecord::subject).collect()
}

/// Claimed totals per beneficiary, sorted by address.
pub fn beneficiary_claims<'a, I>(records: I) -> Vec<Contribution>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut claimed: BTreeMap<Address, u128> = BTreeMap::new();
    for record in records {
        if let EventRecord::BeneficiaryClaim(claim) = record {
            let total = claimed.entry(claim.address).or_insert(0);
            *total = total.saturating_add(claim.value);
        }
    }
    claimed
        .into_iter()
        .map(|(address, atomic)| Contribution {
            address,
            amount: units::to_decimal(atomic),
            role: Role::Beneficiary,
        })
        .collect()
}
