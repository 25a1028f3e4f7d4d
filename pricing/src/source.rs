use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use shared::block::Timestamp;
use shared::error::ErrorClass;
use shared::id::Address;
use shared::network::Network;
use shared::rate_limiter::RateLimiter;
use shared::retry::{Classified, RetryPolicy};
use thiserror::Error;

use crate::registry::AssetEntry;
use crate::series::PricePoint;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceSourceError {
    #[error("network {0} has no price platform")]
    UnsupportedNetwork(Network),
    #[error("price source answered HTTP {status}")]
    Http { status: u16 },
    #[error("price source request failed: {0}")]
    Transport(String),
    #[error("unexpected price source response: {0}")]
    Malformed(String),
}

impl Classified for PriceSourceError {
    fn class(&self) -> ErrorClass {
        match self {
            PriceSourceError::Http { status: 429 } => ErrorClass::RateLimit,
            PriceSourceError::Http { status } if *status >= 500 => {
                ErrorClass::Transient
            }
            PriceSourceError::Transport(_) => ErrorClass::Transient,
            PriceSourceError::UnsupportedNetwork(_) => {
                ErrorClass::Configuration
            }
            _ => ErrorClass::Terminal,
        }
    }
}

impl From<reqwest::Error> for PriceSourceError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => PriceSourceError::Http {
                status: status.as_u16(),
            },
            None => PriceSourceError::Transport(value.to_string()),
        }
    }
}

/// External provider of historical USD prices.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Prefix of the `price_id`s this source understands.
    fn name(&self) -> &'static str;

    /// Registry entry for an asset seen for the first time, `None` when the
    /// source does not know it.
    async fn resolve_asset(
        &self,
        network: &Network,
        asset: &Address,
    ) -> Result<Option<AssetEntry>, PriceSourceError>;

    /// Every known price of `price_id` in `[from, to]`.
    async fn fetch_range(
        &self,
        price_id: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<PricePoint>, PriceSourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKey {
    Pro(String),
    Demo(String),
    Anonymous,
}

impl ApiKey {
    pub fn from_options(pro: Option<String>, demo: Option<String>) -> Self {
        match (pro, demo) {
            (Some(key), _) if !key.is_empty() => ApiKey::Pro(key),
            (_, Some(key)) if !key.is_empty() => ApiKey::Demo(key),
            _ => ApiKey::Anonymous,
        }
    }

    fn base_url(&self) -> &'static str {
        match self {
            ApiKey::Pro(_) => "https://pro-api.coingecko.com/api/v3",
            _ => "https://api.coingecko.com/api/v3",
        }
    }

    /// Spacing that keeps within the plan's per minute quota.
    pub fn default_min_interval(&self) -> Duration {
        match self {
            ApiKey::Pro(_) => Duration::from_millis(240),
            _ => Duration::from_millis(2200),
        }
    }

    fn header(&self) -> Option<(&'static str, &str)> {
        match self {
            ApiKey::Pro(key) => Some(("x-cg-pro-api-key", key)),
            ApiKey::Demo(key) => Some(("x-cg-demo-api-key", key)),
            ApiKey::Anonymous => None,
        }
    }
}

fn default_platforms() -> BTreeMap<Network, String> {
    [
        ("ethereum", "ethereum"),
        ("arbitrum", "arbitrum-one"),
        ("optimism", "optimistic-ethereum"),
        ("base", "base"),
        ("polygon", "polygon-pos"),
        ("avalanche", "avalanche"),
        ("binance", "binance-smart-chain"),
        ("gnosis", "xdai"),
        ("linea", "linea"),
        ("scroll", "scroll"),
        ("sonic", "sonic"),
        ("cronos", "cronos"),
    ]
    .into_iter()
    .map(|(network, platform)| (Network::new(network), platform.to_owned()))
    .collect()
}

/// CoinGecko compatible HTTP price source.
pub struct CoinGecko {
    client: Client,
    base_url: String,
    key: ApiKey,
    limiter: RateLimiter,
    policy: RetryPolicy,
    platforms: BTreeMap<Network, String>,
}

impl CoinGecko {
    pub fn new(
        key: ApiKey,
        min_interval: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let client =
            Client::builder().timeout(Duration::from_secs(45)).build()?;

        Ok(Self {
            client,
            base_url: key.base_url().to_owned(),
            limiter: RateLimiter::new(
                min_interval.unwrap_or_else(|| key.default_min_interval()),
            ),
            key,
            policy: RetryPolicy {
                max_attempts: 6,
                base: Duration::from_secs(1),
                cap: Duration::from_secs(60),
            },
            platforms: default_platforms(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_once(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<Value>, PriceSourceError> {
        self.limiter.acquire().await;

        let mut request = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query);
        if let Some((name, value)) = self.key.header() {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if !status.is_success() => Err(PriceSourceError::Http {
                status: status.as_u16(),
            }),
            _ => response
                .json()
                .await
                .map(Some)
                .map_err(|e| PriceSourceError::Malformed(e.to_string())),
        }
    }

    /// GET with retries on 429 and 5xx. `None` on 404.
    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<Value>, PriceSourceError> {
        self.policy
            .run(path, || self.get_once(path, query))
            .await
    }
}

#[async_trait]
impl PriceSource for CoinGecko {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn resolve_asset(
        &self,
        network: &Network,
        asset: &Address,
    ) -> Result<Option<AssetEntry>, PriceSourceError> {
        let platform = self.platforms.get(network).ok_or_else(|| {
            PriceSourceError::UnsupportedNetwork(network.clone())
        })?;

        let Some(coin) = self
            .get(&format!("/coins/{platform}/contract/{asset}"), &[])
            .await?
        else {
            return Ok(None);
        };

        Ok(parse_coin(&coin, platform))
    }

    async fn fetch_range(
        &self,
        price_id: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<PricePoint>, PriceSourceError> {
        let query = [
            ("vs_currency", "usd".to_owned()),
            ("from", from.to_string()),
            ("to", to.to_string()),
        ];

        match self
            .get(&format!("/coins/{price_id}/market_chart/range"), &query)
            .await?
        {
            Some(chart) => parse_chart(&chart),
            None => Ok(Vec::new()),
        }
    }
}

fn parse_coin(coin: &Value, platform: &str) -> Option<AssetEntry> {
    let id = coin.get("id")?.as_str()?;
    let decimals = coin
        .pointer(&format!("/detail_platforms/{platform}/decimal_place"))
        .and_then(Value::as_u64)
        .and_then(|decimals| u8::try_from(decimals).ok());
    let symbol = coin
        .get("symbol")
        .and_then(Value::as_str)
        .map(str::to_uppercase);

    Some(AssetEntry {
        price_id: format!("coingecko:{id}"),
        decimals,
        symbol,
    })
}

fn parse_chart(chart: &Value) -> Result<Vec<PricePoint>, PriceSourceError> {
    let Some(prices) = chart.get("prices").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    prices
        .iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([millis, price]) => {
                match (millis.as_f64(), price.as_f64()) {
                    (Some(millis), Some(price_usd)) => Ok(PricePoint {
                        timestamp: (millis / 1000.0) as Timestamp,
                        price_usd,
                    }),
                    _ => Err(PriceSourceError::Malformed(pair.to_string())),
                }
            }
            _ => Err(PriceSourceError::Malformed(pair.to_string())),
        })
        .collect()
}
