use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Lowercase network identifier, e.g. `ethereum` or `arbitrum`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(from = "String", into = "String")]
pub struct Network(String);

impl Network {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Network {
    fn from(value: String) -> Self {
        Network::new(value)
    }
}

impl From<&str> for Network {
    fn from(value: &str) -> Self {
        Network::new(value)
    }
}

impl From<Network> for String {
    fn from(value: Network) -> Self {
        value.0
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quirks of a chain that the JSON-RPC decoding has to tolerate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCompat {
    /// Proof-of-authority header: `extraData` is longer than 32 bytes.
    #[serde(default)]
    pub poa: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Subdomain used by the keyed provider, absent when the provider does
    /// not serve this network.
    #[serde(default)]
    pub provider_slug: Option<String>,
    #[serde(default)]
    pub public_endpoints: Vec<String>,
    #[serde(default)]
    pub compat: ChainCompat,
    /// Widest block window accepted by a single `eth_getLogs`.
    #[serde(default = "default_max_log_range")]
    pub max_log_range: u64,
    #[serde(default = "default_min_log_range")]
    pub min_log_range: u64,
}

fn default_max_log_range() -> u64 {
    10
}

fn default_min_log_range() -> u64 {
    1
}

impl NetworkSettings {
    fn keyed(slug: &str, public: &[&str], poa: bool) -> Self {
        Self {
            provider_slug: Some(slug.to_owned()),
            public_endpoints: public
                .iter()
                .map(|url| url.to_string())
                .collect(),
            compat: ChainCompat { poa },
            max_log_range: default_max_log_range(),
            min_log_range: default_min_log_range(),
        }
    }

    fn public(public: &[&str], poa: bool) -> Self {
        Self {
            provider_slug: None,
            ..Self::keyed("", public, poa)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTable {
    /// Keyed endpoint template, `{slug}` and `{key}` are substituted.
    pub credential_url_template: String,
    #[serde(with = "millis")]
    pub credential_min_interval: Duration,
    #[serde(with = "millis")]
    pub public_min_interval: Duration,
    #[serde(default)]
    pub aliases: BTreeMap<Network, Network>,
    pub networks: BTreeMap<Network, NetworkSettings>,
}

impl Default for NetworkTable {
    fn default() -> Self {
        let networks = [
            (
                "ethereum",
                NetworkSettings::keyed(
                    "eth-mainnet",
                    &["https://eth.llamarpc.com", "https://rpc.ankr.com/eth"],
                    false,
                ),
            ),
            (
                "arbitrum",
                NetworkSettings::keyed(
                    "arb-mainnet",
                    &[
                        "https://arb1.arbitrum.io/rpc",
                        "https://arbitrum.llamarpc.com",
                    ],
                    false,
                ),
            ),
            (
                "optimism",
                NetworkSettings::keyed(
                    "opt-mainnet",
                    &[
                        "https://mainnet.optimism.io",
                        "https://optimism.llamarpc.com",
                    ],
                    true,
                ),
            ),
            (
                "base",
                NetworkSettings::keyed(
                    "base-mainnet",
                    &["https://mainnet.base.org", "https://base.llamarpc.com"],
                    false,
                ),
            ),
            (
                "polygon",
                NetworkSettings::keyed(
                    "polygon-mainnet",
                    &[
                        "https://polygon-rpc.com",
                        "https://polygon-bor-rpc.publicnode.com",
                    ],
                    true,
                ),
            ),
            (
                "avalanche",
                NetworkSettings::keyed(
                    "avax-mainnet",
                    &["https://api.avax.network/ext/bc/C/rpc"],
                    true,
                ),
            ),
            (
                "binance",
                NetworkSettings::keyed(
                    "bnb-mainnet",
                    &[
                        "https://bsc-dataseed.binance.org",
                        "https://bsc.publicnode.com",
                    ],
                    true,
                ),
            ),
            (
                "linea",
                NetworkSettings::keyed(
                    "linea-mainnet",
                    &["https://rpc.linea.build"],
                    true,
                ),
            ),
            (
                "gnosis",
                NetworkSettings::keyed(
                    "gnosis-mainnet",
                    &["https://rpc.gnosischain.com"],
                    true,
                ),
            ),
            (
                "scroll",
                NetworkSettings::public(&["https://rpc.scroll.io"], true),
            ),
            (
                "sonic",
                NetworkSettings::public(&["https://rpc.soniclabs.com"], true),
            ),
            (
                "cronos",
                NetworkSettings::public(&["https://evm.cronos.org"], true),
            ),
            (
                "flare",
                NetworkSettings::public(
                    &["https://flare-api.flare.network/ext/C/rpc"],
                    true,
                ),
            ),
            (
                "ink",
                NetworkSettings::public(
                    &["https://rpc-qnd.inkonchain.com"],
                    false,
                ),
            ),
        ]
        .into_iter()
        .map(|(name, settings)| (Network::new(name), settings))
        .collect();

        Self {
            credential_url_template: "https://{slug}.g.alchemy.com/v2/{key}"
                .to_owned(),
            credential_min_interval: Duration::from_millis(100),
            public_min_interval: Duration::from_millis(200),
            aliases: [(Network::new("xdai"), Network::new("gnosis"))]
                .into_iter()
                .collect(),
            networks,
        }
    }
}

impl NetworkTable {
    /// Built-in table, with every network present in `path` replacing the
    /// built-in entry of the same name.
    pub fn with_overrides(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| {
            format!("Failed to read networks file {}", path.display())
        })?;
        let overrides: NetworkOverrides = serde_json::from_str(&raw)
            .with_context(|| {
                format!("Failed to parse networks file {}", path.display())
            })?;

        let mut table = Self::default();
        if let Some(template) = overrides.credential_url_template {
            table.credential_url_template = template;
        }
        if let Some(interval) = overrides.credential_min_interval_ms {
            table.credential_min_interval = Duration::from_millis(interval);
        }
        if let Some(interval) = overrides.public_min_interval_ms {
            table.public_min_interval = Duration::from_millis(interval);
        }
        table.aliases.extend(overrides.aliases);
        table.networks.extend(overrides.networks);

        Ok(table)
    }

    /// Resolves aliases such as `xdai` to the canonical network name.
    pub fn canonical(&self, network: &Network) -> Network {
        self.aliases
            .get(network)
            .cloned()
            .unwrap_or_else(|| network.clone())
    }

    pub fn settings(&self, network: &Network) -> Option<&NetworkSettings> {
        self.networks.get(&self.canonical(network))
    }

    pub fn credential_url(&self, slug: &str, key: &str) -> String {
        self.credential_url_template
            .replace("{slug}", slug)
            .replace("{key}", key)
    }
}

#[derive(Debug, Default, Deserialize)]
struct NetworkOverrides {
    credential_url_template: Option<String>,
    credential_min_interval_ms: Option<u64>,
    public_min_interval_ms: Option<u64>,
    #[serde(default)]
    aliases: BTreeMap<Network, Network>,
    #[serde(default)]
    networks: BTreeMap<Network, NetworkSettings>,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
