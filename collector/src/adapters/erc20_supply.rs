use async_trait::async_trait;
use serde_json::Value;
use shared::adapter::{
    Adapter, AdapterError, DecodeError, FetchContext, Fetched, Fields,
    Snapshot,
};
use shared::entity::EntityConfig;
use shared::error::{CallError, RpcError};
use shared::eth;
use shared::id::Address;
use shared::record::{RawPayload, RawRecord};

const TOTAL_SUPPLY: &str = "0x18160ddd";
const DECIMALS: &str = "0x313ce567";
const METHOD: &str = "totalSupply,decimals";
const WORD_DIGITS: usize = 64;

/// Total supply of each target token at the snapshot block.
///
/// The raw record holds the `totalSupply()` return word followed by the
/// `decimals()` word, so decoding needs no further call.
pub struct Erc20Supply;

fn word(raw: &str) -> Result<String, RpcError> {
    let digits = raw.trim_start_matches("0x");
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RpcError::Malformed(format!("non-hex return data {raw}")));
    }
    match digits.len() {
        0 => Err(RpcError::Malformed("empty return data".to_owned())),
        len if len <= WORD_DIGITS => Ok(format!("{digits:0>64}")),
        _ => Ok(digits[..WORD_DIGITS].to_owned()),
    }
}

fn word_to_u128(word: &str) -> Result<u128, DecodeError> {
    let (high, low) = word.split_at(WORD_DIGITS - 32);
    if high.chars().any(|c| c != '0') {
        return Err(DecodeError(format!("value 0x{word} exceeds 128 bits")));
    }
    u128::from_str_radix(low, 16)
        .map_err(|e| DecodeError(format!("invalid word 0x{word}: {e}")))
}

/// `raw / 10^decimals` for display, exact digits are kept separately.
fn scaled(raw: u128, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(i32::from(decimals))
}

impl Erc20Supply {
    async fn decimals(
        &self,
        ctx: &FetchContext<'_>,
        token: &Address,
        block: u64,
    ) -> Result<u8, CallError> {
        if let Some(decimals) = ctx.decimals.get(ctx.network, token) {
            return Ok(decimals);
        }

        let raw = ctx
            .policy
            .run("decimals", || {
                eth::call(ctx.pool, ctx.network, token, DECIMALS, block)
            })
            .await?;
        let decimals = u8::from_str_radix(&word(&raw)?[WORD_DIGITS - 2..], 16)
            .map_err(|e| RpcError::Malformed(e.to_string()))?;

        ctx.decimals.insert(ctx.network, token, decimals);
        Ok(decimals)
    }
}

#[async_trait]
impl Adapter for Erc20Supply {
    fn protocol(&self) -> &'static str {
        "erc20_supply"
    }

    fn resolve_targets(
        &self,
        entity: &EntityConfig,
    ) -> Result<Vec<Address>, AdapterError> {
        super::require_targets(entity)
    }

    async fn fetch(
        &self,
        ctx: &FetchContext<'_>,
        _entity: &EntityConfig,
        targets: &[Address],
        snapshot: &Snapshot,
    ) -> Result<Fetched, CallError> {
        let block = snapshot.entry.block;
        let mut records = Vec::with_capacity(targets.len());

        for token in targets {
            let decimals = self.decimals(ctx, token, block).await?;
            let supply = ctx
                .policy
                .run("totalSupply", || {
                    eth::call(ctx.pool, ctx.network, token, TOTAL_SUPPLY, block)
                })
                .await?;

            records.push(RawRecord {
                network: ctx.network.clone(),
                block,
                payload: RawPayload::State {
                    address: token.clone(),
                    method: METHOD.to_owned(),
                    data: format!("0x{}{decimals:064x}", word(&supply)?),
                },
            });
        }

        Ok(Fetched {
            records,
            failed_windows: Vec::new(),
        })
    }

    fn decode(&self, record: &RawRecord) -> Result<Fields, DecodeError> {
        let RawPayload::State {
            address,
            method,
            data,
        } = &record.payload
        else {
            return Err(DecodeError("expected a state read".to_owned()));
        };
        let digits = data.trim_start_matches("0x");
        if method != METHOD
            || digits.len() != 2 * WORD_DIGITS
            || !digits.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(DecodeError(format!("unexpected {method} data")));
        }

        let (supply, decimals) = digits.split_at(WORD_DIGITS);
        let supply = word_to_u128(supply)?;
        let decimals = u8::try_from(word_to_u128(decimals)?)
            .map_err(|_| DecodeError("decimals out of range".to_owned()))?;

        let mut fields = Fields::new();
        fields.insert("asset".to_owned(), Value::from(address.as_str()));
        fields.insert("decimals".to_owned(), Value::from(decimals));
        fields.insert(
            "total_supply_raw".to_owned(),
            Value::from(supply.to_string()),
        );
        fields.insert(
            "total_supply".to_owned(),
            Value::from(scaled(supply, decimals)),
        );

        Ok(fields)
    }
}
