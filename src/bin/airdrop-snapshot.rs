use airdrop_harvest::{init_tracing, AirdropPlan, EthLogsClient, HarvestConfig, LogSource, Runner};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// URL of the JSON-RPC endpoint serving eth_getLogs
    #[clap(long, env = "AIRDROP_RPC_URL")]
    rpc_url: String,

    /// Path to the JSON snapshot plan (contracts, denylist, pool budgets)
    #[clap(long, env = "AIRDROP_PLAN")]
    plan: PathBuf,

    /// First block scanned for contracts without their own start block
    #[clap(long, env = "AIRDROP_START_BLOCK")]
    start_block: u64,

    /// Last block scanned. Defaults to the node's current block.
    #[clap(long, env = "AIRDROP_TARGET_BLOCK")]
    target_block: Option<u64>,

    #[clap(long, env = "AIRDROP_CHECKPOINT_DIR", default_value = "checkpoints")]
    checkpoint_dir: PathBuf,

    #[clap(long, env = "AIRDROP_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Concurrent chunk workers. Defaults to the available cores minus one.
    #[clap(long, env = "AIRDROP_THREADS")]
    threads: Option<usize>,

    /// Blocks per checkpoint chunk
    #[clap(long, env = "AIRDROP_STEP_SIZE")]
    step_size: Option<u64>,

    /// Initial block span of a single eth_getLogs request
    #[clap(long, env = "AIRDROP_REQUEST_SPAN")]
    request_span: Option<u64>,

    #[clap(long, env = "AIRDROP_RPC_TIMEOUT_SECS", default_value_t = 30)]
    rpc_timeout_secs: u64,

    /// Minimum balance, in whole tokens, to count as a holder
    #[clap(long, env = "AIRDROP_MIN_HOLDER_AMOUNT", default_value_t = 1.0)]
    min_holder_amount: f64,
}

impl Args {
    fn config(&self) -> Result<HarvestConfig> {
        let mut builder = HarvestConfig::builder()
            .rpc_url(self.rpc_url.clone())
            .start_block(self.start_block)
            .checkpoint_dir(self.checkpoint_dir.clone())
            .output_dir(self.output_dir.clone())
            .rpc_timeout(Duration::from_secs(self.rpc_timeout_secs))
            .min_holder_amount(self.min_holder_amount);
        if let Some(threads) = self.threads {
            builder = builder.thread_count(threads);
        }
        if let Some(step_size) = self.step_size {
            builder = builder.step_size(step_size);
        }
        if let Some(request_span) = self.request_span {
            builder = builder.request_span(request_span);
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let plan = AirdropPlan::load(&args.plan).await?;
    let config = args.config()?;
    let client = Arc::new(EthLogsClient::from_config(&config)?);

    let target = match args.target_block {
        Some(target) if target > config.start_block() => target,
        requested => {
            let head = client
                .block_number()
                .await
                .context("failed to resolve the target block from the node")?;
            if let Some(requested) = requested {
                tracing::warn!(requested, head, "target block not after start block; using chain head");
            }
            head
        }
    };
    let config = config.with_target_block(target)?;

    let source: Arc<dyn LogSource> = client.clone();
    let runner = Runner::new(config, plan, source);
    let summary = runner.run_until_ctrl_c().await?;

    let rpc = client.metrics();
    tracing::info!(
        rpc_requests = rpc.total_requests,
        rpc_errors = rpc.total_errors,
        rpc_timeouts = rpc.total_timeouts,
        average_latency_ms = rpc.average_latency_ms,
        "rpc usage"
    );
    println!(
        "snapshot at block {}: {} communities, {} donors, {} holders, {} managers, {} beneficiaries",
        summary.target_block,
        summary.communities,
        summary.donors,
        summary.holders,
        summary.managers,
        summary.beneficiaries
    );
    println!(
        "{} recipients share {} tokens",
        summary.recipients, summary.total_allocated
    );
    for path in &summary.files {
        println!("wrote {}", path.display());
    }
    Ok(())
}
