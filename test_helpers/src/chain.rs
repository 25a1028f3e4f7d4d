use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use shared::block::{
    parse_hex_quantity, to_hex_quantity, BlockNumber, Timestamp,
};
use shared::client::RpcTransport;
use shared::error::RpcError;
use shared::id::Address;
use shared::network::{ChainCompat, Network};
use shared::pool::{ConnectionPool, EndpointHandle};

#[derive(Debug, Clone)]
struct MockLog {
    address: Address,
    topic: String,
    block: BlockNumber,
    data: String,
    transaction_hash: String,
    log_index: u64,
}

/// In-memory EVM chain answering the JSON-RPC methods the collectors use.
///
/// Blocks are numbered from zero with evenly spaced timestamps. Failures can
/// be injected: a provider range limit on `eth_getLogs`, a rate limit on
/// every n-th request, a refused credential, or a log delivered twice.
#[derive(Default)]
pub struct MockChain {
    timestamps: Vec<Timestamp>,
    logs: Vec<MockLog>,
    deployments: HashMap<Address, BlockNumber>,
    calls: HashMap<(Address, String), String>,
    max_log_range: Option<u64>,
    rate_limit_every: Option<usize>,
    unauthorized: bool,
    requests: AtomicUsize,
    counts: Mutex<HashMap<String, usize>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` blocks, block `n` stamped `genesis + n * block_time`.
    pub fn with_blocks(
        mut self,
        genesis: Timestamp,
        block_time: Timestamp,
        count: u64,
    ) -> Self {
        self.timestamps = (0..count as i64)
            .map(|number| genesis + number * block_time)
            .collect();
        self
    }

    /// Explicit timestamps, block `n` stamped `timestamps[n]`.
    pub fn with_timestamps(mut self, timestamps: Vec<Timestamp>) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn add_log(
        mut self,
        address: &Address,
        topic: &str,
        block: BlockNumber,
        data: &str,
    ) -> Self {
        let sequence = self.logs.len() as u64;
        let log_index = self
            .logs
            .iter()
            .filter(|log| log.block == block)
            .count() as u64;
        self.logs.push(MockLog {
            address: address.clone(),
            topic: topic.to_lowercase(),
            block,
            data: data.to_owned(),
            transaction_hash: format!("0x{:064x}", sequence + 1),
            log_index,
        });
        self
    }

    /// Delivers the `nth` log added again at `block` with `data`, keeping its
    /// transaction hash and log index.
    pub fn redeliver_log(
        mut self,
        nth: usize,
        block: BlockNumber,
        data: &str,
    ) -> Self {
        let mut copy = self.logs[nth].clone();
        copy.block = block;
        copy.data = data.to_owned();
        self.logs.push(copy);
        self
    }

    /// `address` has code from block `at` onwards.
    pub fn deploy(mut self, address: &Address, at: BlockNumber) -> Self {
        self.deployments.insert(address.clone(), at);
        self
    }

    /// `eth_call` to `address` with `selector` returns `result`.
    pub fn on_call(
        mut self,
        address: &Address,
        selector: &str,
        result: &str,
    ) -> Self {
        self.calls
            .insert((address.clone(), selector.to_owned()), result.to_owned());
        self
    }

    pub fn max_log_range(mut self, blocks: u64) -> Self {
        self.max_log_range = Some(blocks);
        self
    }

    /// Every `n`-th request is answered with HTTP 429.
    pub fn rate_limit_every(mut self, n: usize) -> Self {
        self.rate_limit_every = Some(n);
        self
    }

    /// Every request is answered with HTTP 401.
    pub fn unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }

    pub fn head(&self) -> BlockNumber {
        self.timestamps.len().saturating_sub(1) as BlockNumber
    }

    pub fn timestamp_of(&self, block: BlockNumber) -> Option<Timestamp> {
        self.timestamps.get(block as usize).copied()
    }

    /// Requests received so far, failed ones included.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn count(&self, method: &str) -> usize {
        self.counts
            .lock()
            .unwrap()
            .get(method)
            .copied()
            .unwrap_or_default()
    }

    pub fn reset_counts(&self) {
        self.requests.store(0, Ordering::SeqCst);
        self.counts.lock().unwrap().clear();
    }

    fn block_param(&self, value: &Value) -> Result<BlockNumber, RpcError> {
        match value.as_str() {
            Some("latest") => Ok(self.head()),
            Some(raw) => parse_hex_quantity(raw),
            None => Err(invalid_params("block parameter")),
        }
    }

    fn block(&self, params: &Value) -> Result<Value, RpcError> {
        let number = self.block_param(&params[0])?;
        Ok(match self.timestamp_of(number) {
            Some(timestamp) => json!({
                "number": to_hex_quantity(number),
                "timestamp": to_hex_quantity(timestamp as u64),
                "hash": format!("0x{number:064x}"),
                "extraData": "0x",
            }),
            None => Value::Null,
        })
    }

    fn logs(&self, params: &Value) -> Result<Value, RpcError> {
        let filter = &params[0];
        let from = self.block_param(&filter["fromBlock"])?;
        let to = self.block_param(&filter["toBlock"])?;

        if let Some(max) = self.max_log_range {
            if to.saturating_sub(from) + 1 > max {
                return Err(RpcError::JsonRpc {
                    code: -32600,
                    message: format!(
                        "Log response size exceeded. You can make eth_getLogs \
                         requests with up to a {max} block range."
                    ),
                });
            }
        }

        let addresses: Vec<&str> = filter["address"]
            .as_array()
            .map(|addresses| {
                addresses.iter().filter_map(Value::as_str).collect()
            })
            .unwrap_or_default();
        let topics: Vec<String> = filter["topics"][0]
            .as_array()
            .map(|topics| {
                topics
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();

        let logs = self
            .logs
            .iter()
            .filter(|log| (from..=to).contains(&log.block))
            .filter(|log| {
                addresses.is_empty()
                    || addresses.contains(&log.address.as_str())
            })
            .filter(|log| topics.is_empty() || topics.contains(&log.topic))
            .map(|log| {
                json!({
                    "address": log.address,
                    "topics": [log.topic],
                    "data": log.data,
                    "blockNumber": to_hex_quantity(log.block),
                    "transactionHash": log.transaction_hash,
                    "logIndex": to_hex_quantity(log.log_index),
                    "removed": false,
                })
            })
            .collect();

        Ok(Value::Array(logs))
    }

    fn has_code_at(&self, address: &Address, block: BlockNumber) -> bool {
        self.deployments
            .get(address)
            .is_some_and(|deployed| block >= *deployed)
    }

    fn code(&self, params: &Value) -> Result<Value, RpcError> {
        let address = address_param(&params[0])?;
        let block = self.block_param(&params[1])?;

        Ok(if self.has_code_at(&address, block) {
            json!("0x6080604052")
        } else {
            json!("0x")
        })
    }

    fn call(&self, params: &Value) -> Result<Value, RpcError> {
        let address = address_param(&params[0]["to"])?;
        let data = params[0]["data"]
            .as_str()
            .ok_or_else(|| invalid_params("call data"))?;
        let block = self.block_param(&params[1])?;
        let selector = data.get(..10).unwrap_or(data);

        match self.calls.get(&(address.clone(), selector.to_owned())) {
            Some(result) if self.has_code_at(&address, block) => {
                Ok(json!(result))
            }
            _ => Err(RpcError::JsonRpc {
                code: 3,
                message: "execution reverted".to_owned(),
            }),
        }
    }
}

fn invalid_params(what: &str) -> RpcError {
    RpcError::JsonRpc {
        code: -32602,
        message: format!("invalid {what}"),
    }
}

fn address_param(value: &Value) -> Result<Address, RpcError> {
    value
        .as_str()
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| invalid_params("address"))
}

#[async_trait]
impl RpcTransport for MockChain {
    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let sequence = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .counts
            .lock()
            .unwrap()
            .entry(method.to_owned())
            .or_default() += 1;

        if self.unauthorized {
            return Err(RpcError::Http {
                status: 401,
                body: "Must be authenticated!".to_owned(),
            });
        }
        if let Some(every) = self.rate_limit_every {
            if sequence % every == 0 {
                return Err(RpcError::Http {
                    status: 429,
                    body: "Too Many Requests".to_owned(),
                });
            }
        }

        match method {
            "eth_blockNumber" => Ok(json!(to_hex_quantity(self.head()))),
            "eth_getBlockByNumber" => self.block(&params),
            "eth_getLogs" => self.logs(&params),
            "eth_getCode" => self.code(&params),
            "eth_call" => self.call(&params),
            other => Err(RpcError::JsonRpc {
                code: -32601,
                message: format!("the method {other} does not exist"),
            }),
        }
    }
}

/// Endpoint handle over `chain` with no rate limit.
pub fn mock_handle(
    network: &Network,
    label: &str,
    chain: &Arc<MockChain>,
) -> EndpointHandle {
    EndpointHandle::new(
        network.clone(),
        label,
        true,
        ChainCompat::default(),
        Duration::ZERO,
        Arc::clone(chain) as Arc<dyn RpcTransport>,
    )
}

/// Pool with a single unthrottled handle over `chain` for `network`.
pub fn mock_pool(network: &Network, chain: &Arc<MockChain>) -> ConnectionPool {
    ConnectionPool::from_handles(vec![mock_handle(network, "mock", chain)])
        .unwrap()
}
