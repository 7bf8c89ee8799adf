//! Typed event records produced by the harvester and the compact tuple rows
//! used to persist them in checkpoint artifacts.
//!
//! Every supported log schema has its own variant; the schema is chosen from
//! the [`EventKind`] of the query, never from the payload.

use alloy_primitives::{hex, keccak256, Address, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of event schemas the harvester knows how to fetch and store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transfer,
    CommunityAdded,
    CommunityMigrated,
    ManagerAdded,
    BeneficiaryAdded,
    BeneficiaryClaim,
    Log,
}

impl EventKind {
    /// Canonical Solidity signature hashed into `topic0`.
    ///
    /// Generic logs are fetched unfiltered and have no signature.
    pub fn signature(&self) -> Option<&'static str> {
        match self {
            EventKind::Transfer => Some("Transfer(address,address,uint256)"),
            EventKind::CommunityAdded => {
                Some("CommunityAdded(address,address,uint256,uint256,uint256,uint256)")
            }
            EventKind::CommunityMigrated => Some("CommunityMigrated(address,address,address)"),
            EventKind::ManagerAdded => Some("ManagerAdded(address)"),
            EventKind::BeneficiaryAdded => Some("BeneficiaryAdded(address)"),
            EventKind::BeneficiaryClaim => Some("BeneficiaryClaim(address,uint256)"),
            EventKind::Log => None,
        }
    }

    pub fn topic0(&self) -> Option<B256> {
        self.signature().map(|sig| keccak256(sig.as_bytes()))
    }

    /// Label embedded in checkpoint artifact names.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Transfer => "transfers",
            EventKind::CommunityAdded => "communities",
            EventKind::CommunityMigrated => "migrations",
            EventKind::ManagerAdded => "managers",
            EventKind::BeneficiaryAdded => "beneficiaries",
            EventKind::BeneficiaryClaim => "claims",
            EventKind::Log => "logs",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    /// Amount in atomic units.
    pub value: u128,
    pub block: u64,
}

/// An address granted a role (community, manager, beneficiary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEvent {
    pub address: Address,
    pub block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimEvent {
    pub address: Address,
    pub value: u128,
    pub block: u64,
}

/// A community contract replaced by a successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationEvent {
    pub address: Address,
    pub previous: Address,
    pub block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericLog {
    pub emitter: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRecord {
    Transfer(TransferEvent),
    CommunityAdded(RoleEvent),
    CommunityMigrated(MigrationEvent),
    ManagerAdded(RoleEvent),
    BeneficiaryAdded(RoleEvent),
    BeneficiaryClaim(ClaimEvent),
    Log(GenericLog),
}

impl EventRecord {
    pub fn kind(&self) -> EventKind {
        match self {
            EventRecord::Transfer(_) => EventKind::Transfer,
            EventRecord::CommunityAdded(_) => EventKind::CommunityAdded,
            EventRecord::CommunityMigrated(_) => EventKind::CommunityMigrated,
            EventRecord::ManagerAdded(_) => EventKind::ManagerAdded,
            EventRecord::BeneficiaryAdded(_) => EventKind::BeneficiaryAdded,
            EventRecord::BeneficiaryClaim(_) => EventKind::BeneficiaryClaim,
            EventRecord::Log(_) => EventKind::Log,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            EventRecord::Transfer(event) => event.block,
            EventRecord::CommunityAdded(event)
            | EventRecord::ManagerAdded(event)
            | EventRecord::BeneficiaryAdded(event) => event.block,
            EventRecord::CommunityMigrated(event) => event.block,
            EventRecord::BeneficiaryClaim(event) => event.block,
            EventRecord::Log(event) => event.block,
        }
    }

    /// The address the record is about: the receiver of a transfer, the
    /// account granted a role, the successor of a migration, the emitter of a
    /// generic log.
    pub fn subject(&self) -> Address {
        match self {
            EventRecord::Transfer(event) => event.to,
            EventRecord::CommunityAdded(event)
            | EventRecord::ManagerAdded(event)
            | EventRecord::BeneficiaryAdded(event) => event.address,
            EventRecord::CommunityMigrated(event) => event.address,
            EventRecord::BeneficiaryClaim(event) => event.address,
            EventRecord::Log(event) => event.emitter,
        }
    }

    pub fn as_transfer(&self) -> Option<&TransferEvent> {
        match self {
            EventRecord::Transfer(event) => Some(event),
            _ => None,
        }
    }
}

/// Lower-case, `0x`-prefixed rendering used in every file the crate writes.
pub fn format_address(address: &Address) -> String {
    hex::encode_prefixed(address)
}

mod hex_address {
    use alloy_primitives::{hex, Address};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_prefixed(address))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::from_str(&raw).map_err(|err| D::Error::custom(format!("bad address {raw}: {err}")))
    }
}

mod hex_words {
    use alloy_primitives::{hex, B256};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(words: &[B256], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(words.iter().map(hex::encode_prefixed))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<B256>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|raw| {
                B256::from_str(&raw).map_err(|err| D::Error::custom(format!("bad topic {raw}: {err}")))
            })
            .collect()
    }
}

mod hex_bytes {
    use alloy_primitives::hex;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_prefixed(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(&raw).map_err(|err| D::Error::custom(format!("bad data {raw}: {err}")))
    }
}

#[derive(Serialize, Deserialize)]
struct TransferRow(
    #[serde(with = "hex_address")] Address,
    #[serde(with = "hex_address")] Address,
    u128,
    u64,
);

#[derive(Serialize, Deserialize)]
struct RoleRow(#[serde(with = "hex_address")] Address, u64);

#[derive(Serialize, Deserialize)]
struct ClaimRow(#[serde(with = "hex_address")] Address, u128, u64);

#[derive(Serialize, Deserialize)]
struct MigrationRow(
    #[serde(with = "hex_address")] Address,
    #[serde(with = "hex_address")] Address,
    u64,
);

#[derive(Serialize, Deserialize)]
struct LogRow(
    #[serde(with = "hex_address")] Address,
    #[serde(with = "hex_words")] Vec<B256>,
    #[serde(with = "hex_bytes")] Vec<u8>,
    u64,
);

#[derive(Serialize)]
#[serde(untagged)]
enum Row {
    Transfer(TransferRow),
    Role(RoleRow),
    Claim(ClaimRow),
    Migration(MigrationRow),
    Log(LogRow),
}

/// Serializes records of one kind into the artifact's JSON array of tuples.
///
/// Records of any other kind are rejected so an artifact is always homogeneous.
pub fn encode_records(kind: EventKind, records: &[EventRecord]) -> anyhow::Result<Vec<u8>> {
    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let row = match (kind, record) {
            (EventKind::Transfer, EventRecord::Transfer(e)) => {
                Row::Transfer(TransferRow(e.from, e.to, e.value, e.block))
            }
            (EventKind::CommunityAdded, EventRecord::CommunityAdded(e))
            | (EventKind::ManagerAdded, EventRecord::ManagerAdded(e))
            | (EventKind::BeneficiaryAdded, EventRecord::BeneficiaryAdded(e)) => {
                Row::Role(RoleRow(e.address, e.block))
            }
            (EventKind::BeneficiaryClaim, EventRecord::BeneficiaryClaim(e)) => {
                Row::Claim(ClaimRow(e.address, e.value, e.block))
            }
            (EventKind::CommunityMigrated, EventRecord::CommunityMigrated(e)) => {
                Row::Migration(MigrationRow(e.address, e.previous, e.block))
            }
            (EventKind::Log, EventRecord::Log(e)) => {
                Row::Log(LogRow(e.emitter, e.topics.clone(), e.data.clone(), e.block))
            }
            (expected, other) => anyhow::bail!(
                "cannot store a {} record in a {} artifact",
                other.kind(),
                expected
            ),
        };
        rows.push(row);
    }
    Ok(serde_json::to_vec(&rows)?)
}

/// Parses an artifact payload written by [`encode_records`].
pub fn decode_records(kind: EventKind, bytes: &[u8]) -> Result<Vec<EventRecord>, serde_json::Error> {
    let records = match kind {
        EventKind::Transfer => serde_json::from_slice::<Vec<TransferRow>>(bytes)?
            .into_iter()
            .map(|TransferRow(from, to, value, block)| {
                EventRecord::Transfer(TransferEvent {
                    from,
                    to,
                    value,
                    block,
                })
            })
            .collect(),
        EventKind::CommunityAdded | EventKind::ManagerAdded | EventKind::BeneficiaryAdded => {
            serde_json::from_slice::<Vec<RoleRow>>(bytes)?
                .into_iter()
                .map(|RoleRow(address, block)| {
                    let event = RoleEvent { address, block };
                    match kind {
                        EventKind::CommunityAdded => EventRecord::CommunityAdded(event),
                        EventKind::ManagerAdded => EventRecord::ManagerAdded(event),
                        _ => EventRecord::BeneficiaryAdded(event),
                    }
                })
                .collect()
        }
        EventKind::BeneficiaryClaim => serde_json::from_slice::<Vec<ClaimRow>>(bytes)?
            .into_iter()
            .map(|ClaimRow(address, value, block)| {
                EventRecord::BeneficiaryClaim(ClaimEvent {
                    address,
                    value,
                    block,
                })
            })
            .collect(),
        EventKind::CommunityMigrated => serde_json::from_slice::<Vec<MigrationRow>>(bytes)?
            .into_iter()
            .map(|MigrationRow(address, previous, block)| {
                EventRecord::CommunityMigrated(MigrationEvent {
                    address,
                    previous,
                    block,
                })
            })
            .collect(),
        EventKind::Log => serde_json::from_slice::<Vec<LogRow>>(bytes)?
            .into_iter()
            .map(|LogRow(emitter, topics, data, block)| {
                EventRecord::Log(GenericLog {
                    emitter,
                    topics,
                    data,
                    block,
                })
            })
            .collect(),
    };
    Ok(records)
}
