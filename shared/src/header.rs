use serde_json::Value;

use crate::block::{quantity_field, BlockNumber, Timestamp};
use crate::error::RpcError;
use crate::network::ChainCompat;

const MAX_EXTRA_DATA_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: BlockNumber,
    pub timestamp: Timestamp,
    pub hash: Option<String>,
}

impl BlockHeader {
    pub fn from_json(
        value: &Value,
        compat: ChainCompat,
    ) -> Result<Self, RpcError> {
        if value.is_null() {
            return Err(RpcError::Malformed("block not found".to_owned()));
        }

        if !compat.poa {
            if let Some(extra) = value.get("extraData").and_then(Value::as_str)
            {
                let bytes = extra.trim_start_matches("0x").len() / 2;
                if bytes > MAX_EXTRA_DATA_BYTES {
                    return Err(RpcError::Malformed(format!(
                        "extraData is {bytes} bytes, the network needs the \
                         POA compatibility flag"
                    )));
                }
            }
        }

        Ok(Self {
            number: quantity_field(value, "number")?,
            timestamp: quantity_field(value, "timestamp")? as Timestamp,
            hash: value
                .get("hash")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }
}
