use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use airdrop_harvest::events::{ClaimEvent, MigrationEvent, RoleEvent, TransferEvent};
use airdrop_harvest::{
    BlockRange, EventKind, EventRecord, HarvestConfig, HarvestError, LogQuery, LogSource,
};
use alloy_primitives::Address;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub const SCALE: u128 = 1_000_000_000_000_000_000;

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn transfer(from: Address, to: Address, tokens: u128, block: u64) -> EventRecord {
    EventRecord::Transfer(TransferEvent {
        from,
        to,
        value: tokens * SCALE,
        block,
    })
}

pub fn community_added(community: Address, block: u64) -> EventRecord {
    EventRecord::CommunityAdded(RoleEvent {
        address: community,
        block,
    })
}

pub fn community_migrated(successor: Address, previous: Address, block: u64) -> EventRecord {
    EventRecord::CommunityMigrated(MigrationEvent {
        address: successor,
        previous,
        block,
    })
}

pub fn manager_added(manager: Address, block: u64) -> EventRecord {
    EventRecord::ManagerAdded(RoleEvent {
        address: manager,
        block,
    })
}

pub fn beneficiary_claim(beneficiary: Address, tokens: u128, block: u64) -> EventRecord {
    EventRecord::BeneficiaryClaim(ClaimEvent {
        address: beneficiary,
        value: tokens * SCALE,
        block,
    })
}

/// How a scripted source misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Windows wider than this many blocks time out.
    TimeoutAbove(u64),
    /// Every request touching this block fails with a hard error.
    FailAt(u64),
    /// Every request touching this block panics.
    PanicAt(u64),
}

/// In-memory log source: answers each query with the scripted records of the
/// queried contract and kind inside the requested window.
#[derive(Default)]
pub struct ScriptedSource {
    logs: HashMap<(Address, EventKind), Vec<EventRecord>>,
    faults: Mutex<Vec<Fault>>,
    calls: AtomicUsize,
    windows: Mutex<Vec<BlockRange>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logs(
        mut self,
        contract: Address,
        records: impl IntoIterator<Item = EventRecord>,
    ) -> Self {
        for record in records {
            self.logs
                .entry((contract, record.kind()))
                .or_default()
                .push(record);
        }
        self
    }

    pub fn with_fault(self, fault: Fault) -> Self {
        self.faults.lock().unwrap().push(fault);
        self
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Successful request windows, in call order.
    pub fn windows(&self) -> Vec<BlockRange> {
        self.windows.lock().unwrap().clone()
    }

    fn answer(&self, query: &LogQuery) -> Result<Vec<EventRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let range = query.range;

        let faults = self.faults.lock().unwrap().clone();
        for fault in faults {
            match fault {
                Fault::TimeoutAbove(span) if range.len() > span => {
                    return Err(HarvestError::TransientFetch { range }.into());
                }
                Fault::FailAt(block) if range.contains(block) => {
                    return Err(anyhow!("node refused blocks {range}"));
                }
                Fault::PanicAt(block) if range.contains(block) => {
                    panic!("scripted panic at block {block}");
                }
                _ => {}
            }
        }

        self.windows.lock().unwrap().push(range);
        Ok(self
            .logs
            .get(&(query.contract, query.kind))
            .map(|records| {
                records
                    .iter()
                    .filter(|record| range.contains(record.block_number()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl LogSource for ScriptedSource {
    fn get_logs<'a>(&'a self, query: &'a LogQuery) -> BoxFuture<'a, Result<Vec<EventRecord>>> {
        Box::pin(async move { self.answer(query) })
    }
}

/// Fast-retrying config writing under `dir`.
pub fn test_config(dir: &Path, start: u64, target: u64, step: u64, span: u64) -> HarvestConfig {
    HarvestConfig::builder()
        .rpc_url("http://127.0.0.1:9")
        .start_block(start)
        .target_block(target)
        .step_size(step)
        .request_span(span)
        .thread_count(3)
        .retry_initial_backoff(Duration::from_millis(1))
        .retry_max_backoff(Duration::from_millis(4))
        .checkpoint_dir(dir.join("checkpoints"))
        .output_dir(dir.join("output"))
        .build()
        .expect("test config should be valid")
}

pub fn blocks(records: &[EventRecord]) -> Vec<u64> {
    records.iter().map(EventRecord::block_number).collect()
}

pub fn shared(source: ScriptedSource) -> (Arc<ScriptedSource>, Arc<dyn LogSource>) {
    let source = Arc::new(source);
    let dyn_source: Arc<dyn LogSource> = source.clone();
    (source, dyn_source)
}
