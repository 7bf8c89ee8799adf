//! Turns raw `eth_getLogs` entries into typed [`EventRecord`]s.
//!
//! The schema is chosen from the queried [`EventKind`]; a log that does not
//! fit it (missing topics, short data, a value above `u128`) is an error, not
//! a skipped entry.

use crate::events::{
    ClaimEvent, EventKind, EventRecord, GenericLog, MigrationEvent, RoleEvent, TransferEvent,
};
use alloy_primitives::{Address, Bytes, B256};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

/// One log object as returned by the node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// Parses a JSON-RPC hex quantity (`"0x1a"`).
pub fn parse_quantity(raw: &str) -> Result<u64> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("quantity {raw:?} is missing the 0x prefix"))?;
    if digits.is_empty() {
        bail!("quantity {raw:?} has no digits");
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid quantity {raw:?}"))
}

pub fn format_quantity(value: u64) -> String {
    format!("{value:#x}")
}

pub fn decode_log(kind: EventKind, log: &RawLog) -> Result<EventRecord> {
    let block = log
        .block_number
        .as_deref()
        .ok_or_else(|| anyhow!("log from {} has no block number (pending?)", log.address))
        .and_then(parse_quantity)?;

    let record = match kind {
        EventKind::Transfer => EventRecord::Transfer(TransferEvent {
            from: topic_address(log, 1)?,
            to: topic_address(log, 2)?,
            value: data_value(log, 0)?,
            block,
        }),
        EventKind::CommunityAdded => EventRecord::CommunityAdded(RoleEvent {
            address: topic_address(log, 1)?,
            block,
        }),
        EventKind::ManagerAdded => EventRecord::ManagerAdded(RoleEvent {
            address: topic_address(log, 1)?,
            block,
        }),
        EventKind::BeneficiaryAdded => EventRecord::BeneficiaryAdded(RoleEvent {
            address: topic_address(log, 1)?,
            block,
        }),
        EventKind::BeneficiaryClaim => EventRecord::BeneficiaryClaim(ClaimEvent {
            address: topic_address(log, 1)?,
            value: data_value(log, 0)?,
            block,
        }),
        EventKind::CommunityMigrated => EventRecord::CommunityMigrated(MigrationEvent {
            address: topic_address(log, 1)?,
            previous: topic_address(log, 2)?,
            block,
        }),
        EventKind::Log => EventRecord::Log(GenericLog {
            emitter: log.address,
            topics: log.topics.clone(),
            data: log.data.to_vec(),
            block,
        }),
    };
    Ok(record)
}

/// Decodes a whole response, dropping logs the node flags as removed.
pub fn decode_logs(kind: EventKind, logs: &[RawLog]) -> Result<Vec<EventRecord>> {
    logs.iter()
        .filter(|log| !log.removed)
        .map(|log| decode_log(kind, log).with_context(|| format!("failed to decode {kind} log")))
        .collect()
}

fn topic_address(log: &RawLog, index: usize) -> Result<Address> {
    let topic = log.topics.get(index).ok_or_else(|| {
        anyhow!(
            "log from {} has {} topics, expected an indexed address at {index}",
            log.address,
            log.topics.len()
        )
    })?;
    Ok(Address::from_word(*topic))
}

/// Reads a `uint256` data word that must fit in `u128`.
fn data_value(log: &RawLog, word: usize) -> Result<u128> {
    let start = word * 32;
    let bytes = log.data.get(start..start + 32).ok_or_else(|| {
        anyhow!(
            "log from {} has {} data bytes, expected word {word}",
            log.address,
            log.data.len()
        )
    })?;
    let (high, low) = bytes.split_at(16);
    if high.iter().any(|b| *b != 0) {
        bail!("log from {} carries a value above u128", log.address);
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(low);
    Ok(u128::from_be_bytes(buf))
}
