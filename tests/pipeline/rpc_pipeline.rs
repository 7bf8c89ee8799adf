use std::time::Duration;

use crate::support::{
    helpers::{addr, blocks, init_tracing, manager_added, transfer},
    mock_rpc::{MockLogChain, MockRpcServer},
};
use airdrop_harvest::{
    is_transient, BlockRange, EthLogsClient, EventHarvester, EventKind, HarvestConfig,
    HarvestQuery, LogQuery, LogSource, RpcClientOptions,
};
use anyhow::Result;
use std::sync::Arc;

const TOKEN: u8 = 0x70;
const OTHER_TOKEN: u8 = 0x71;
const COMMUNITY: u8 = 0x0c;

#[tokio::test]
async fn client_decodes_matching_logs() -> Result<()> {
    init_tracing();
    let chain = MockLogChain::new(500);
    let expected = vec![
        transfer(addr(0x01), addr(COMMUNITY), 3, 12),
        transfer(addr(0x02), addr(0x03), 1, 40),
    ];
    for record in &expected {
        chain.push(addr(TOKEN), record);
    }
    chain.push(addr(OTHER_TOKEN), &transfer(addr(0x01), addr(0x02), 9, 20));
    chain.push(addr(TOKEN), &manager_added(addr(0x04), 30));
    chain.push_removed(addr(TOKEN), &transfer(addr(0x05), addr(0x06), 1, 35));
    chain.push(addr(TOKEN), &transfer(addr(0x07), addr(0x08), 1, 90));

    let server = MockRpcServer::start(chain.clone()).await?;
    let client = EthLogsClient::new(server.url())?;

    let query = LogQuery::new(addr(TOKEN), EventKind::Transfer, BlockRange::new(10, 50)?);
    let records = client.get_logs(&query).await?;
    assert_eq!(records, expected);
    assert_eq!(client.block_number().await?, 500);

    let metrics = client.metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.total_logs, 3, "removed logs still travel over the wire");
    assert_eq!(metrics.total_errors, 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn slow_node_surfaces_as_transient() -> Result<()> {
    init_tracing();
    let chain = MockLogChain::new(100);
    chain.set_delay(Duration::from_millis(400));
    let server = MockRpcServer::start(chain).await?;

    let client = EthLogsClient::with_options(
        server.url(),
        RpcClientOptions {
            request_timeout: Duration::from_millis(100),
            ..RpcClientOptions::default()
        },
    )?;
    let query = LogQuery::new(addr(TOKEN), EventKind::Transfer, BlockRange::new(1, 100)?);
    let err = client.get_logs(&query).await.unwrap_err();
    assert!(is_transient(&err), "{err:#}");
    assert_eq!(client.metrics().total_timeouts, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn harvest_over_http_resumes_from_checkpoints() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let chain = MockLogChain::new(300);
    for block in (5..=300).step_by(11) {
        chain.push(addr(TOKEN), &transfer(addr(0x01), addr(0x02), 2, block));
    }
    let server = MockRpcServer::start(chain.clone()).await?;

    let config = HarvestConfig::builder()
        .rpc_url(server.url())
        .start_block(1)
        .target_block(300)
        .step_size(100)
        .request_span(40)
        .thread_count(2)
        .checkpoint_dir(dir.path().join("checkpoints"))
        .output_dir(dir.path().join("output"))
        .build()?;
    let source: Arc<dyn LogSource> = Arc::new(EthLogsClient::from_config(&config)?);
    let query = HarvestQuery::new(addr(TOKEN), EventKind::Transfer, "cUSD");

    let records = EventHarvester::new(config.clone())
        .harvest(source.clone(), &query, 1, 300)
        .await?;
    assert_eq!(blocks(&records), (5..=300).step_by(11).collect::<Vec<_>>());
    let calls = chain.get_logs_calls();
    assert_eq!(calls, 9, "three chunks of 100 blocks in windows of 40");

    let again = EventHarvester::new(config)
        .harvest(source, &query, 1, 300)
        .await?;
    assert_eq!(again, records);
    assert_eq!(chain.get_logs_calls(), calls);

    server.shutdown().await;
    Ok(())
}
