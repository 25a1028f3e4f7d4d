use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::block::{quantity_field, BlockNumber};
use crate::error::RpcError;
use crate::id::Address;
use crate::network::Network;

/// One entry of an `eth_getLogs` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: BlockNumber,
    pub transaction_hash: String,
    pub log_index: u64,
}

impl RawLog {
    pub fn from_json(value: &Value) -> Result<Self, RpcError> {
        let text = |field: &str| {
            value
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| {
                    RpcError::Malformed(format!("log without {field}"))
                })
        };

        let address = text("address")?
            .parse()
            .map_err(|e: crate::id::InvalidAddress| {
                RpcError::Malformed(e.to_string())
            })?;
        let topics = value
            .get("topics")
            .and_then(Value::as_array)
            .map(|topics| {
                topics
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            address,
            topics,
            data: text("data")?,
            block_number: quantity_field(value, "blockNumber")?,
            transaction_hash: text("transactionHash")?.to_lowercase(),
            log_index: quantity_field(value, "logIndex")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawPayload {
    Log(RawLog),
    /// Return data of a view call made against `address`.
    State {
        address: Address,
        method: String,
        data: String,
    },
}

/// A log or state read together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub network: Network,
    pub block: BlockNumber,
    pub payload: RawPayload,
}

/// Identity used to drop records delivered twice by overlapping windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Log { transaction_hash: String, log_index: u64 },
    State { address: Address, method: String, block: BlockNumber },
}

impl RawRecord {
    pub fn from_log(network: Network, log: RawLog) -> Self {
        Self {
            network,
            block: log.block_number,
            payload: RawPayload::Log(log),
        }
    }

    pub fn key(&self) -> RecordKey {
        match &self.payload {
            RawPayload::Log(log) => RecordKey::Log {
                transaction_hash: log.transaction_hash.clone(),
                log_index: log.log_index,
            },
            RawPayload::State {
                address, method, ..
            } => RecordKey::State {
                address: address.clone(),
                method: method.clone(),
                block: self.block,
            },
        }
    }

    pub fn transaction_hash(&self) -> Option<&str> {
        match &self.payload {
            RawPayload::Log(log) => Some(&log.transaction_hash),
            RawPayload::State { .. } => None,
        }
    }

    pub fn log_index(&self) -> Option<u64> {
        match &self.payload {
            RawPayload::Log(log) => Some(log.log_index),
            RawPayload::State { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn logs_are_parsed_and_keyed() {
        let value = json!({
            "address": "0x6B175474E89094C44Da98b954EedeAC495271d0F",
            "topics": ["0xDDF252AD1BE2C89B69C2B068FC378DAA952BA7F163C4A11628F55A4DF523B3EF"],
            "data": "0x01",
            "blockNumber": "0x10",
            "transactionHash": "0xAB",
            "logIndex": "0x2",
            "removed": false
        });

        let log = RawLog::from_json(&value).unwrap();
        assert_eq!(log.block_number, 16);
        assert_eq!(log.transaction_hash, "0xab");
        assert!(log.topics[0].starts_with("0xddf252ad"));

        let record = RawRecord::from_log("ethereum".into(), log);
        assert_eq!(
            record.key(),
            RecordKey::Log {
                transaction_hash: "0xab".to_owned(),
                log_index: 2
            }
        );
        assert_eq!(record.log_index(), Some(2));
    }

    #[test]
    fn incomplete_logs_are_malformed() {
        let value = json!({
            "address": "0x6b175474e89094c44da98b954eedeac495271d0f",
            "blockNumber": "0x10",
        });

        assert!(RawLog::from_json(&value).is_err());
    }
}
