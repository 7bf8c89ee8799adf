use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use airdrop_harvest::EventRecord;
use alloy_primitives::{hex, Address, B256};
use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Logs served by the mock node, in `eth_getLogs` wire form.
#[derive(Clone, Default)]
pub struct MockLogChain {
    logs: Arc<RwLock<Vec<Value>>>,
    head: Arc<AtomicU64>,
    delay_ms: Arc<AtomicU64>,
    get_logs_calls: Arc<AtomicUsize>,
}

impl MockLogChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.head.store(head, Ordering::SeqCst);
        chain
    }

    pub fn push(&self, contract: Address, record: &EventRecord) {
        self.logs
            .write()
            .expect("mock chain poisoned")
            .push(wire_log(contract, record, false));
    }

    /// Adds a log flagged as removed by a reorg.
    pub fn push_removed(&self, contract: Address, record: &EventRecord) {
        self.logs
            .write()
            .expect("mock chain poisoned")
            .push(wire_log(contract, record, true));
    }

    /// Delays every `eth_getLogs` answer.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn get_logs_calls(&self) -> usize {
        self.get_logs_calls.load(Ordering::SeqCst)
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))
    }

    fn matching(&self, filter: &Value) -> Option<Vec<Value>> {
        let address = filter.get("address")?.as_str()?.to_ascii_lowercase();
        let from = quantity(filter.get("fromBlock")?)?;
        let to = quantity(filter.get("toBlock")?)?;
        let topic0 = filter
            .get("topics")
            .and_then(|topics| topics.get(0))
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase);

        let logs = self.logs.read().expect("mock chain poisoned");
        Some(
            logs.iter()
                .filter(|log| log["address"].as_str() == Some(address.as_str()))
                .filter(|log| {
                    quantity(&log["blockNumber"]).is_some_and(|block| from <= block && block <= to)
                })
                .filter(|log| match &topic0 {
                    Some(topic0) => log["topics"][0].as_str() == Some(topic0.as_str()),
                    None => true,
                })
                .cloned()
                .collect(),
        )
    }
}

fn quantity(value: &Value) -> Option<u64> {
    let raw = value.as_str()?.strip_prefix("0x")?;
    u64::from_str_radix(raw, 16).ok()
}

fn word(value: u128) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[16..].copy_from_slice(&value.to_be_bytes());
    B256::from(bytes)
}

fn wire_log(contract: Address, record: &EventRecord, removed: bool) -> Value {
    let kind = record.kind();
    let mut topics: Vec<B256> = kind.topic0().into_iter().collect();
    let mut data: Vec<u8> = Vec::new();

    match record {
        EventRecord::Transfer(event) => {
            topics.push(event.from.into_word());
            topics.push(event.to.into_word());
            data.extend_from_slice(word(event.value).as_slice());
        }
        EventRecord::CommunityAdded(event)
        | EventRecord::ManagerAdded(event)
        | EventRecord::BeneficiaryAdded(event) => topics.push(event.address.into_word()),
        EventRecord::CommunityMigrated(event) => {
            topics.push(event.address.into_word());
            topics.push(event.previous.into_word());
        }
        EventRecord::BeneficiaryClaim(event) => {
            topics.push(event.address.into_word());
            data.extend_from_slice(word(event.value).as_slice());
        }
        EventRecord::Log(event) => {
            topics = event.topics.clone();
            data = event.data.clone();
        }
    }
    json!({
        "address": hex::encode_prefixed(contract),
        "topics": topics.iter().map(hex::encode_prefixed).collect::<Vec<_>>(),
        "data": hex::encode_prefixed(&data),
        "blockNumber": format!("{:#x}", record.block_number()),
        "removed": removed,
    })
}

pub struct MockRpcServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRpcServer {
    pub async fn start(chain: MockLogChain) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock RPC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let chain = chain.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(chain.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(chain: MockLogChain, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let call: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = handle_call(&chain, call).await;
    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

async fn handle_call(chain: &MockLogChain, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call
        .get("params")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    match method.as_str() {
        "eth_blockNumber" => success(
            id,
            Value::String(format!("{:#x}", chain.head.load(Ordering::SeqCst))),
        ),
        "eth_getLogs" => {
            chain.get_logs_calls.fetch_add(1, Ordering::SeqCst);
            let delay = chain.delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match params.get(0).and_then(|filter| chain.matching(filter)) {
                Some(logs) => success(id, Value::Array(logs)),
                None => error(id, -32602, "invalid log filter"),
            }
        }
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
