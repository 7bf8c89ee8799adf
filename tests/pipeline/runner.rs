use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::support::helpers::{
    addr, beneficiary_claim, community_added, community_migrated, init_tracing, manager_added,
    shared, test_config, transfer, ScriptedSource,
};
use airdrop_harvest::events::format_address;
use airdrop_harvest::output::{
    DISTRIBUTION_FILE, DISTRIBUTION_JSON_FILE, DONORS_FILE, HOLDERS_FILE, MANAGERS_FILE,
};
use airdrop_harvest::runtime::plan::{PoolBudgets, RegistryPlan, TokenPlan};
use airdrop_harvest::{AirdropPlan, HarvestError, Runner};
use alloy_primitives::Address;
use anyhow::Result;

const REGISTRY: u8 = 0x5e;
const CUSD: u8 = 0x70;
const CELO: u8 = 0x71;
const UBE: u8 = 0x72;

const A: u8 = 0x0a;
const B: u8 = 0x0b;
const D: u8 = 0x0d;
const E: u8 = 0x0e;
const F: u8 = 0x0f;
const M1: u8 = 0x31;
const M2: u8 = 0x32;
const C1: u8 = 0xc1;
const C2: u8 = 0xc2;
const C3: u8 = 0xc3;
const OUTSIDER: u8 = 0x99;

/// Two communities, one of which (C2) was migrated to C3 halfway through and
/// handed its cUSD balance over.
fn scripted_chain() -> ScriptedSource {
    ScriptedSource::new()
        .with_logs(
            addr(REGISTRY),
            [
                community_added(addr(C1), 10),
                community_added(addr(C2), 20),
                community_migrated(addr(C3), addr(C2), 50),
            ],
        )
        .with_logs(
            addr(CUSD),
            [
                transfer(addr(A), addr(C1), 100, 30),
                transfer(addr(B), addr(C2), 50, 60),
                transfer(addr(C2), addr(C3), 50, 65),
                transfer(addr(B), addr(C3), 10, 70),
                transfer(addr(D), addr(OUTSIDER), 5, 80),
            ],
        )
        .with_logs(
            addr(CELO),
            [
                transfer(Address::ZERO, addr(A), 10, 5),
                transfer(Address::ZERO, addr(E), 3, 6),
                transfer(addr(E), addr(A), 1, 90),
            ],
        )
        .with_logs(addr(C1), [manager_added(addr(M1), 15), beneficiary_claim(addr(F), 4, 100)])
        .with_logs(addr(C3), [manager_added(addr(M2), 55), manager_added(addr(M1), 56)])
}

fn plan(denylist: BTreeSet<Address>, beneficiaries_budget: f64) -> AirdropPlan {
    AirdropPlan {
        registry: RegistryPlan {
            address: addr(REGISTRY),
            deployment_block: Some(1),
        },
        tokens: vec![
            TokenPlan {
                name: "cUSD".into(),
                address: addr(CUSD),
                start_block: None,
                donations: true,
                holders: false,
            },
            TokenPlan {
                name: "CELO".into(),
                address: addr(CELO),
                start_block: Some(1),
                donations: false,
                holders: true,
            },
        ],
        denylist,
        aliases: BTreeMap::new(),
        pools: PoolBudgets {
            donors: 600.0,
            holders: 200.0,
            managers: 100.0,
            beneficiaries: beneficiaries_budget,
        },
    }
}

fn row(byte: u8, amount: &str) -> String {
    format!("{},{amount}\n", format_address(&addr(byte)))
}

fn read(dir: &Path, name: &str) -> String {
    std::fs::read_to_string(dir.join(name)).unwrap_or_else(|err| panic!("{name}: {err}"))
}

#[tokio::test]
async fn snapshot_writes_the_merged_distribution() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path(), 1, 200, 50, 50);
    let (source, dyn_source) = shared(scripted_chain());

    let summary = Runner::new(config.clone(), plan(BTreeSet::new(), 100.0), dyn_source)
        .run()
        .await?;

    assert_eq!(summary.target_block, 200);
    assert_eq!(summary.communities, 2);
    assert_eq!(summary.donors, 2);
    assert_eq!(summary.holders, 2);
    assert_eq!(summary.managers, 2);
    assert_eq!(summary.beneficiaries, 1);
    assert_eq!(summary.recipients, 6);
    assert!((summary.total_allocated - 1_000.0).abs() < 1e-9);
    assert_eq!(summary.files.len(), 7);
    assert_eq!(summary.telemetry.fetch_calls as usize, source.calls());

    let out = config.output_dir();
    let expected = [
        "address,amount\n".to_owned(),
        row(M1, "50"),
        row(M2, "50"),
        row(E, "100"),
        row(F, "100"),
        row(B, "225"),
        row(A, "475"),
    ]
    .concat();
    assert_eq!(read(out, DISTRIBUTION_FILE), expected);

    let donors = ["address,amount\n".to_owned(), row(B, "60"), row(A, "100")].concat();
    assert_eq!(read(out, DONORS_FILE), donors);

    let managers = read(out, MANAGERS_FILE);
    assert_eq!(managers.lines().count(), 3);

    let json: BTreeMap<String, String> =
        serde_json::from_str(&read(out, DISTRIBUTION_JSON_FILE))?;
    assert_eq!(json[&format_address(&addr(A))], "475000000000000000000");
    Ok(())
}

#[tokio::test]
async fn holders_are_reported_per_token() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path(), 1, 200, 50, 50);
    let chain = scripted_chain().with_logs(
        addr(UBE),
        [
            transfer(Address::ZERO, addr(A), 7, 5),
            transfer(Address::ZERO, addr(E), 4, 8),
        ],
    );
    let (_source, dyn_source) = shared(chain);

    let mut plan = plan(BTreeSet::new(), 100.0);
    plan.tokens.push(TokenPlan {
        name: "UBE".into(),
        address: addr(UBE),
        start_block: Some(1),
        donations: false,
        holders: true,
    });
    let summary = Runner::new(config.clone(), plan, dyn_source).run().await?;
    assert_eq!(summary.holders, 2);

    let out = config.output_dir();
    let holders = [
        "token,address,amount\n".to_owned(),
        format!("CELO,{}", row(E, "2")),
        format!("CELO,{}", row(A, "11")),
        format!("UBE,{}", row(E, "4")),
        format!("UBE,{}", row(A, "7")),
    ]
    .concat();
    assert_eq!(read(out, HOLDERS_FILE), holders);

    // A and E hold both tokens but still split the holders pool once each.
    let distribution = read(out, DISTRIBUTION_FILE);
    assert!(distribution.contains(&row(E, "100")));
    assert!(distribution.contains(&row(A, "475")));
    Ok(())
}

#[tokio::test]
async fn rerun_is_served_from_checkpoints() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path(), 1, 200, 50, 50);
    let (source, dyn_source) = shared(scripted_chain());

    Runner::new(config.clone(), plan(BTreeSet::new(), 100.0), dyn_source.clone())
        .run()
        .await?;
    let calls = source.calls();
    let first = read(config.output_dir(), DISTRIBUTION_FILE);

    let summary = Runner::new(config.clone(), plan(BTreeSet::new(), 100.0), dyn_source)
        .run()
        .await?;
    assert_eq!(source.calls(), calls);
    assert_eq!(summary.telemetry.fetch_calls, 0);
    assert_eq!(read(config.output_dir(), DISTRIBUTION_FILE), first);
    Ok(())
}

#[tokio::test]
async fn denylisted_addresses_receive_nothing() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path(), 1, 200, 50, 50);
    let (_source, dyn_source) = shared(scripted_chain());

    let denylist = BTreeSet::from([addr(M1), addr(B)]);
    let summary = Runner::new(config.clone(), plan(denylist, 100.0), dyn_source)
        .run()
        .await?;
    assert_eq!(summary.recipients, 4);

    let distribution = read(config.output_dir(), DISTRIBUTION_FILE);
    assert!(!distribution.contains(&format_address(&addr(M1))));
    assert!(!distribution.contains(&format_address(&addr(B))));
    assert!(distribution.contains(&row(M2, "100")));
    assert!(distribution.contains(&row(A, "700")));
    Ok(())
}

#[tokio::test]
async fn failed_snapshot_writes_no_output() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path(), 1, 200, 50, 50);
    let (_source, dyn_source) = shared(scripted_chain());

    let err = Runner::new(config.clone(), plan(BTreeSet::from([addr(F)]), 100.0), dyn_source)
        .run()
        .await
        .unwrap_err();
    assert!(
        matches!(
            err.downcast_ref::<HarvestError>(),
            Some(HarvestError::EmptyPool { pool }) if pool == "beneficiaries"
        ),
        "{err:#}"
    );
    assert!(!config.output_dir().exists());
    Ok(())
}

#[tokio::test]
async fn unresolved_target_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = airdrop_harvest::HarvestConfig::builder()
        .rpc_url("http://127.0.0.1:9")
        .start_block(1)
        .checkpoint_dir(dir.path().join("checkpoints"))
        .output_dir(dir.path().join("output"))
        .build()?;
    let (source, dyn_source) = shared(scripted_chain());

    let err = Runner::new(config, plan(BTreeSet::new(), 0.0), dyn_source)
        .run()
        .await
        .unwrap_err();
    assert!(format!("{err}").contains("target_block"));
    assert_eq!(source.calls(), 0);
    Ok(())
}
