use crate::contributions::{
    beneficiary_claims, extract_donors, extract_unique_addresses, AliasMap, Contribution, Role,
    TokenHolders,
};
use crate::events::{format_address, EventKind, EventRecord, TransferEvent};
use crate::harvest::{EventHarvester, HarvestQuery};
use crate::ledger;
use crate::output::{OutputWriter, SnapshotReport};
use crate::rewards::{RewardAllocator, RewardPool};
use crate::rpc::LogSource;
use crate::runtime::config::HarvestConfig;
use crate::runtime::plan::AirdropPlan;
use crate::runtime::telemetry::TelemetrySnapshot;
use alloy_primitives::Address;
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

const REGISTRY_TAG: &str = "registry";

/// What a finished snapshot produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub target_block: u64,
    pub communities: usize,
    pub donors: usize,
    pub holders: usize,
    pub managers: usize,
    pub beneficiaries: usize,
    pub recipients: usize,
    pub total_allocated: f64,
    pub files: Vec<PathBuf>,
    pub telemetry: TelemetrySnapshot,
}

/// Drives one snapshot end to end: harvest every contract the plan names,
/// derive contributors, allocate the pools and write the report.
///
/// Nothing is written to the output directory unless every step succeeds.
pub struct Runner {
    harvester: EventHarvester,
    plan: AirdropPlan,
    source: Arc<dyn LogSource>,
    shutdown: CancellationToken,
}

struct Communities {
    /// Every community contract seen, deprecated ones included, with the
    /// block it first appeared at.
    contracts: BTreeMap<Address, u64>,
    /// Live communities after alias resolution.
    live: BTreeSet<Address>,
    aliases: AliasMap,
}

impl Runner {
    pub fn new(config: HarvestConfig, plan: AirdropPlan, source: Arc<dyn LogSource>) -> Self {
        let shutdown = CancellationToken::new();
        let harvester = EventHarvester::with_cancellation_token(config, shutdown.clone());
        Self {
            harvester,
            plan,
            source,
            shutdown,
        }
    }

    /// Root token; cancelling it aborts every in-flight harvest.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &HarvestConfig {
        self.harvester.config()
    }

    pub fn plan(&self) -> &AirdropPlan {
        &self.plan
    }

    /// Like [`Runner::run`], cancelling the snapshot on Ctrl-C (SIGINT).
    pub async fn run_until_ctrl_c(&self) -> Result<RunSummary> {
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; cancelling snapshot");
                self.shutdown.cancel();
                run.await
            }
        }
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let config = self.harvester.config();
        let target = config
            .target_block()
            .ok_or_else(|| anyhow!("target_block must be resolved before running a snapshot"))?;
        tracing::info!(
            start_block = config.start_block(),
            target_block = target,
            tokens = self.plan.tokens.len(),
            "snapshot started"
        );

        let communities = self.communities(target).await?;

        let (donors, holders) = self.token_contributions(target, &communities).await?;

        let (managers, beneficiaries) = self.community_roles(target, &communities).await?;

        let pools = self.reward_pools(&donors, &holders, &managers, &beneficiaries);
        let allocator = RewardAllocator::new(self.plan.denylist.clone());
        let distribution = allocator.allocate(&pools)?;

        let report = SnapshotReport {
            donors,
            holders,
            managers,
            beneficiaries,
            distribution,
        };
        let files = OutputWriter::new(config.output_dir())
            .write_report(&report)
            .await?;

        let summary = RunSummary {
            target_block: target,
            communities: communities.live.len(),
            donors: report.donors.len(),
            holders: TokenHolders::unique_addresses(&report.holders).len(),
            managers: report.managers.len(),
            beneficiaries: report.beneficiaries.len(),
            recipients: report.distribution.len(),
            total_allocated: report.distribution.total(),
            files,
            telemetry: self.harvester.telemetry().snapshot(),
        };
        tracing::info!(
            recipients = summary.recipients,
            total_allocated = summary.total_allocated,
            fetch_calls = summary.telemetry.fetch_calls,
            "snapshot finished"
        );
        Ok(summary)
    }

    async fn harvest(&self, query: HarvestQuery, from: u64, to: u64) -> Result<Vec<EventRecord>> {
        self.harvester
            .harvest(self.source.clone(), &query, from, to)
            .await
    }

    async fn communities(&self, target: u64) -> Result<Communities> {
        let registry = &self.plan.registry;
        let from = registry
            .deployment_block
            .unwrap_or(self.harvester.config().start_block());

        let added = self
            .harvest(
                HarvestQuery::new(registry.address, EventKind::CommunityAdded, REGISTRY_TAG),
                from,
                target,
            )
            .await?;
        let migrated = self
            .harvest(
                HarvestQuery::new(registry.address, EventKind::CommunityMigrated, REGISTRY_TAG),
                from,
                target,
            )
            .await?;

        let mut aliases = AliasMap::from_migrations(&migrated);
        for (deprecated, successor) in &self.plan.aliases {
            aliases.insert(*deprecated, *successor);
        }

        let mut contracts: BTreeMap<Address, u64> = BTreeMap::new();
        let mut seen = |address: Address, block: u64| {
            let first = contracts.entry(address).or_insert(block);
            *first = (*first).min(block);
        };
        for record in &added {
            seen(record.subject(), record.block_number());
        }
        for record in &migrated {
            if let EventRecord::CommunityMigrated(migration) = record {
                seen(migration.address, migration.block);
                seen(migration.previous, from);
            }
        }

        let live: BTreeSet<Address> = contracts.keys().map(|c| aliases.resolve(*c)).collect();
        tracing::info!(
            communities = live.len(),
            contracts = contracts.len(),
            aliases = aliases.len(),
            "communities resolved"
        );
        Ok(Communities {
            contracts,
            live,
            aliases,
        })
    }

    async fn token_contributions(
        &self,
        target: u64,
        communities: &Communities,
    ) -> Result<(Vec<Contribution>, Vec<TokenHolders>)> {
        let mut donated: BTreeMap<Address, f64> = BTreeMap::new();
        let mut held = Vec::new();
        let known: BTreeSet<Address> = communities.contracts.keys().copied().collect();

        for token in &self.plan.tokens {
            if !token.donations && !token.holders {
                tracing::debug!(token = %token.name, "token neither donated nor held; skipping");
                continue;
            }
            let from = token
                .start_block
                .unwrap_or(self.harvester.config().start_block());
            let records = self
                .harvest(
                    HarvestQuery::new(token.address, EventKind::Transfer, token.name.trim()),
                    from,
                    target,
                )
                .await?;
            let transfers: Vec<&TransferEvent> =
                records.iter().filter_map(EventRecord::as_transfer).collect();

            if token.donations {
                let donors =
                    extract_donors(transfers.iter().copied(), &known, &communities.aliases);
                tracing::info!(token = %token.name, donors = donors.len(), "donors extracted");
                for donor in donors {
                    *donated.entry(donor.address).or_insert(0.0) += donor.amount;
                }
            }
            if token.holders {
                let balances = ledger::holders(
                    transfers.iter().copied(),
                    self.harvester.config().min_holder_amount(),
                )?;
                tracing::info!(token = %token.name, holders = balances.len(), "holders computed");
                held.push(TokenHolders::new(token.name.trim(), balances));
            }
        }

        let donors = donated
            .into_iter()
            .map(|(address, amount)| Contribution {
                address,
                amount,
                role: Role::Donor,
            })
            .collect();
        Ok((donors, held))
    }

    async fn community_roles(
        &self,
        target: u64,
        communities: &Communities,
    ) -> Result<(BTreeSet<Address>, Vec<Contribution>)> {
        let mut manager_records = Vec::new();
        let mut claim_records = Vec::new();

        for (contract, first_block) in &communities.contracts {
            let tag = format!("community-{}", format_address(contract));
            let from = (*first_block).min(target.saturating_sub(1));

            manager_records.extend(
                self.harvest(
                    HarvestQuery::new(*contract, EventKind::ManagerAdded, tag.clone()),
                    from,
                    target,
                )
                .await?,
            );
            claim_records.extend(
                self.harvest(
                    HarvestQuery::new(*contract, EventKind::BeneficiaryClaim, tag),
                    from,
                    target,
                )
                .await?,
            );
        }

        let managers = extract_unique_addresses(&manager_records);
        let beneficiaries = beneficiary_claims(&claim_records);
        tracing::info!(
            managers = managers.len(),
            beneficiaries = beneficiaries.len(),
            "community roles extracted"
        );
        Ok((managers, beneficiaries))
    }

    /// Pools with a positive budget. Donors are weighted by the amount they
    /// donated; every other pool is split equally. An address holding several
    /// tokens takes a single holders share.
    fn reward_pools(
        &self,
        donors: &[Contribution],
        holders: &[TokenHolders],
        managers: &BTreeSet<Address>,
        beneficiaries: &[Contribution],
    ) -> Vec<RewardPool> {
        let budgets = &self.plan.pools;
        let mut pools = Vec::new();
        if budgets.donors > 0.0 {
            pools.push(RewardPool::from_contributions("donors", budgets.donors, donors));
        }
        if budgets.holders > 0.0 {
            pools.push(RewardPool::equal_split(
                "holders",
                budgets.holders,
                TokenHolders::unique_addresses(holders),
            ));
        }
        if budgets.managers > 0.0 {
            pools.push(RewardPool::equal_split(
                "managers",
                budgets.managers,
                managers.iter().copied(),
            ));
        }
        if budgets.beneficiaries > 0.0 {
            pools.push(RewardPool::equal_split(
                "beneficiaries",
                budgets.beneficiaries,
                beneficiaries.iter().map(|b| b.address),
            ));
        }
        pools
    }
}
