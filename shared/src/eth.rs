//! Typed Ethereum JSON-RPC calls. Every call acquires a fresh handle from the
//! pool so consecutive calls of one task spread over all credentials.

use serde_json::{json, Value};

use crate::block::{
    parse_hex_quantity, to_hex_quantity, BlockNumber, ScanWindow,
};
use crate::error::{CallError, RpcError};
use crate::header::BlockHeader;
use crate::id::Address;
use crate::network::Network;
use crate::pool::ConnectionPool;
use crate::record::RawLog;

/// Log query: any of `addresses`, first topic any of `topics`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<Address>,
    pub topics: Vec<String>,
}

impl LogFilter {
    pub fn to_params(&self, window: ScanWindow) -> Value {
        let mut filter = json!({
            "fromBlock": to_hex_quantity(window.from),
            "toBlock": to_hex_quantity(window.to),
        });

        if !self.addresses.is_empty() {
            filter["address"] = json!(self.addresses);
        }
        if !self.topics.is_empty() {
            filter["topics"] = json!([self.topics]);
        }

        json!([filter])
    }
}

async fn request(
    pool: &ConnectionPool,
    network: &Network,
    method: &str,
    params: Value,
) -> Result<Value, CallError> {
    let handle = pool.acquire(network).await?;
    Ok(handle.call(method, params).await?)
}

fn as_text(value: Value) -> Result<String, RpcError> {
    match value {
        Value::String(text) => Ok(text),
        other => {
            Err(RpcError::Malformed(format!("expected string, got {other}")))
        }
    }
}

pub async fn latest_block(
    pool: &ConnectionPool,
    network: &Network,
) -> Result<BlockNumber, CallError> {
    let value = request(pool, network, "eth_blockNumber", json!([])).await?;
    Ok(parse_hex_quantity(&as_text(value)?)?)
}

pub async fn block_header(
    pool: &ConnectionPool,
    network: &Network,
    number: BlockNumber,
) -> Result<BlockHeader, CallError> {
    let handle = pool.acquire(network).await?;
    let value = handle
        .call(
            "eth_getBlockByNumber",
            json!([to_hex_quantity(number), false]),
        )
        .await?;

    Ok(BlockHeader::from_json(&value, handle.compat())?)
}

pub async fn get_logs(
    pool: &ConnectionPool,
    network: &Network,
    filter: &LogFilter,
    window: ScanWindow,
) -> Result<Vec<RawLog>, CallError> {
    let value =
        request(pool, network, "eth_getLogs", filter.to_params(window)).await?;

    let logs = value.as_array().ok_or_else(|| {
        RpcError::Malformed("eth_getLogs did not return an array".to_owned())
    })?;

    logs.iter()
        .filter(|log| log.get("removed") != Some(&Value::Bool(true)))
        .map(|log| RawLog::from_json(log).map_err(CallError::from))
        .collect()
}

pub async fn get_code(
    pool: &ConnectionPool,
    network: &Network,
    address: &Address,
    block: BlockNumber,
) -> Result<String, CallError> {
    let value = request(
        pool,
        network,
        "eth_getCode",
        json!([address, to_hex_quantity(block)]),
    )
    .await?;

    Ok(as_text(value)?)
}

pub async fn has_code(
    pool: &ConnectionPool,
    network: &Network,
    address: &Address,
    block: BlockNumber,
) -> Result<bool, CallError> {
    let code = get_code(pool, network, address, block).await?;
    Ok(!code.trim_start_matches("0x").is_empty())
}

/// `eth_call` against `to` with hex `data` at `block`, returning hex.
pub async fn call(
    pool: &ConnectionPool,
    network: &Network,
    to: &Address,
    data: &str,
    block: BlockNumber,
) -> Result<String, CallError> {
    let value = request(
        pool,
        network,
        "eth_call",
        json!([{"to": to, "data": data}, to_hex_quantity(block)]),
    )
    .await?;

    Ok(as_text(value)?)
}
