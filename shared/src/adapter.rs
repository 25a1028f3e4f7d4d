//! Seam between the extraction core and protocol specific decoding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::block_cache::DateBlockEntry;
use crate::entity::EntityConfig;
use crate::error::CallError;
use crate::id::Address;
use crate::network::Network;
use crate::pool::ConnectionPool;
use crate::record::RawRecord;
use crate::retry::RetryPolicy;
use crate::scanner::{ScanConfig, WindowFailure};

/// Decoded record fields, without provenance.
pub type Fields = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot decode record: {0}")]
pub struct DecodeError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("no adapter registered for protocol {0}")]
    UnknownProtocol(String),
    #[error("entity {entity} is misconfigured: {reason}")]
    Misconfigured { entity: String, reason: String },
}

/// Memo of token decimals, shared by every task of one run.
#[derive(Debug, Default)]
pub struct DecimalsMemo {
    known: Mutex<HashMap<(Network, Address), u8>>,
}

impl DecimalsMemo {
    pub fn get(&self, network: &Network, token: &Address) -> Option<u8> {
        let key = (network.clone(), token.clone());
        self.known
            .lock()
            .ok()
            .and_then(|known| known.get(&key).copied())
    }

    pub fn insert(&self, network: &Network, token: &Address, decimals: u8) {
        if let Ok(mut known) = self.known.lock() {
            known.insert((network.clone(), token.clone()), decimals);
        }
    }
}

/// Everything an adapter may use while fetching one snapshot.
pub struct FetchContext<'a> {
    pub pool: &'a ConnectionPool,
    pub network: &'a Network,
    pub scan: ScanConfig,
    pub policy: RetryPolicy,
    pub decimals: &'a DecimalsMemo,
}

/// The day being extracted and its snapshot block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub entry: DateBlockEntry,
    /// First block of the day, for adapters that cover the whole day.
    pub first_block: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fetched {
    pub records: Vec<RawRecord>,
    pub failed_windows: Vec<WindowFailure>,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Identifier entities use to select this adapter.
    fn protocol(&self) -> &'static str;

    fn resolve_targets(
        &self,
        entity: &EntityConfig,
    ) -> Result<Vec<Address>, AdapterError>;

    async fn fetch(
        &self,
        ctx: &FetchContext<'_>,
        entity: &EntityConfig,
        targets: &[Address],
        snapshot: &Snapshot,
    ) -> Result<Fetched, CallError>;

    fn decode(&self, record: &RawRecord) -> Result<Fields, DecodeError>;
}

#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn register(&mut self, adapter: impl Adapter + 'static) -> &mut Self {
        self.adapters.insert(adapter.protocol(), Arc::new(adapter));
        self
    }

    pub fn get(
        &self,
        protocol: &str,
    ) -> Result<Arc<dyn Adapter>, AdapterError> {
        self.adapters
            .get(protocol)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownProtocol(protocol.to_owned()))
    }

    pub fn protocols(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.adapters.keys().copied()
    }
}
