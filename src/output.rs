//! Snapshot output files.
//!
//! Every file is rendered in memory first, synced to a temp file and then
//! committed with a rename, so a reader never sees half a file.

use crate::checkpoint::store::{sync_dir, write_durably};
use crate::contributions::{Contribution, TokenHolders};
use crate::events::format_address;
use crate::rewards::Distribution;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const DONORS_FILE: &str = "donors.csv";
pub const HOLDERS_FILE: &str = "holders.csv";
pub const MANAGERS_FILE: &str = "managers.csv";
pub const BENEFICIARIES_FILE: &str = "beneficiaries.csv";
pub const DISTRIBUTION_FILE: &str = "reward_distribution.csv";
pub const DISTRIBUTION_BASE_18_FILE: &str = "reward_distribution_base_18.csv";
pub const DISTRIBUTION_JSON_FILE: &str = "reward_distribution.json";

/// Everything a snapshot run writes.
#[derive(Debug, Clone, Default)]
pub struct SnapshotReport {
    pub donors: Vec<Contribution>,
    pub holders: Vec<TokenHolders>,
    pub managers: BTreeSet<Address>,
    pub beneficiaries: Vec<Contribution>,
    pub distribution: Distribution,
}

fn by_amount(contributions: &[Contribution]) -> Vec<&Contribution> {
    let mut rows: Vec<&Contribution> = contributions.iter().collect();
    rows.sort_by(|a, b| {
        a.amount
            .total_cmp(&b.amount)
            .then_with(|| a.address.cmp(&b.address))
    });
    rows
}

/// `address,amount` rows, ascending by amount then address.
pub fn contributions_csv(contributions: &[Contribution]) -> Result<Vec<u8>> {
    let rows = by_amount(contributions);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["address", "amount"])?;
    for contribution in rows {
        writer.write_record([
            format_address(&contribution.address),
            contribution.amount.to_string(),
        ])?;
    }
    finish(writer)
}

/// `token,address,amount` rows: one block per token in the given order, each
/// block ascending by amount then address.
pub fn holders_csv(tokens: &[TokenHolders]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["token", "address", "amount"])?;
    for token in tokens {
        for holder in by_amount(&token.holders) {
            writer.write_record([
                token.token.clone(),
                format_address(&holder.address),
                holder.amount.to_string(),
            ])?;
        }
    }
    finish(writer)
}

pub fn addresses_csv(addresses: &BTreeSet<Address>) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["address"])?;
    for address in addresses {
        writer.write_record([format_address(address)])?;
    }
    finish(writer)
}

pub fn distribution_csv(distribution: &Distribution) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["address", "amount"])?;
    for entry in distribution.entries() {
        writer.write_record([format_address(&entry.address), entry.amount.to_string()])?;
    }
    finish(writer)
}

pub fn distribution_base_18_csv(distribution: &Distribution) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["address", "amount"])?;
    for entry in distribution.entries() {
        writer.write_record([format_address(&entry.address), entry.scaled.to_string()])?;
    }
    finish(writer)
}

/// `{address: "scaled amount"}`, keyed in address order.
pub fn distribution_json(distribution: &Distribution) -> Result<Vec<u8>> {
    let map: BTreeMap<String, String> = distribution
        .by_address()
        .into_iter()
        .map(|(address, entry)| (format_address(&address), entry.scaled.to_string()))
        .collect();
    let mut bytes = serde_json::to_vec_pretty(&map)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to flush csv buffer: {}", err.error()))
}

#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes all report files, returning their paths.
    pub async fn write_report(&self, report: &SnapshotReport) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create output dir {}", self.dir.display()))?;

        let files = [
            (DONORS_FILE, contributions_csv(&report.donors)?),
            (HOLDERS_FILE, holders_csv(&report.holders)?),
            (MANAGERS_FILE, addresses_csv(&report.managers)?),
            (BENEFICIARIES_FILE, contributions_csv(&report.beneficiaries)?),
            (DISTRIBUTION_FILE, distribution_csv(&report.distribution)?),
            (
                DISTRIBUTION_BASE_18_FILE,
                distribution_base_18_csv(&report.distribution)?,
            ),
            (DISTRIBUTION_JSON_FILE, distribution_json(&report.distribution)?),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (name, bytes) in files {
            written.push(self.commit(name, &bytes).await?);
        }
        sync_dir(&self.dir)
            .await
            .with_context(|| format!("failed to sync output dir {}", self.dir.display()))?;
        tracing::info!(dir = %self.dir.display(), files = written.len(), "snapshot written");
        Ok(written)
    }

    async fn commit(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let temp_path = self.dir.join(format!("{name}.tmp"));
        write_durably(&temp_path, bytes)
            .await
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("failed to commit {}", path.display()))?;
        Ok(path)
    }
}
