use serde::{Deserialize, Serialize};

use crate::error::RpcError;

pub type BlockNumber = u64;
/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Inclusive block window handed to one `eth_getLogs` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    pub from: BlockNumber,
    pub to: BlockNumber,
}

impl ScanWindow {
    pub fn new(from: BlockNumber, to: BlockNumber) -> Self {
        Self { from, to }
    }

    pub fn width(&self) -> u64 {
        self.to.saturating_sub(self.from) + 1
    }
}

impl std::fmt::Display for ScanWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

pub fn to_hex_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

pub fn parse_hex_quantity(raw: &str) -> Result<u64, RpcError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| RpcError::Malformed(format!("not a quantity: {raw}")))?;

    if digits.is_empty() {
        return Ok(0);
    }

    u64::from_str_radix(digits, 16)
        .map_err(|_| RpcError::Malformed(format!("not a quantity: {raw}")))
}

/// Reads a hex quantity field out of a JSON object.
pub fn quantity_field(
    value: &serde_json::Value,
    field: &str,
) -> Result<u64, RpcError> {
    value
        .get(field)
        .and_then(|field| field.as_str())
        .ok_or_else(|| RpcError::Malformed(format!("missing field {field}")))
        .and_then(parse_hex_quantity)
}
