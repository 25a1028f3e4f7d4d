use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shared::id::Address;
use shared::network::Network;
use shared::utils::{read_json, write_json_atomic};

/// External price series of an asset, e.g. `coingecko:dai`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub price_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl AssetEntry {
    /// Splits `price_id` into its source and the identifier at that source.
    pub fn source_and_id(&self) -> Option<(&str, &str)> {
        self.price_id.split_once(':')
    }
}

/// Persistent `network:asset` to [`AssetEntry`] mapping.
#[derive(Debug, Clone)]
pub struct AssetRegistry {
    path: PathBuf,
    entries: BTreeMap<String, AssetEntry>,
}

fn key(network: &Network, asset: &Address) -> String {
    format!("{network}:{asset}")
}

impl AssetRegistry {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let entries: BTreeMap<String, AssetEntry> =
            read_json(path)?.unwrap_or_default();

        Ok(Self {
            path: path.to_owned(),
            entries: entries
                .into_iter()
                .map(|(key, entry)| (key.to_lowercase(), entry))
                .collect(),
        })
    }

    pub fn get(
        &self,
        network: &Network,
        asset: &Address,
    ) -> Option<&AssetEntry> {
        self.entries.get(&key(network, asset))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `entry` and rewrites the registry file atomically.
    pub fn insert(
        &mut self,
        network: &Network,
        asset: &Address,
        entry: AssetEntry,
    ) -> anyhow::Result<()> {
        self.entries.insert(key(network, asset), entry);
        write_json_atomic(&self.path, &self.entries)
    }
}
