use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pricing::registry::AssetEntry;
use pricing::series::PricePoint;
use pricing::source::{PriceSource, PriceSourceError};
use shared::block::Timestamp;
use shared::id::Address;
use shared::network::Network;

/// Price source serving fixed series, recording every range it was asked
/// for.
#[derive(Default)]
pub struct MockPriceSource {
    assets: HashMap<(Network, Address), AssetEntry>,
    series: HashMap<String, Vec<PricePoint>>,
    fetches: Mutex<Vec<(String, Timestamp, Timestamp)>>,
}

impl MockPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `asset` known as `mock:{id}` with the given hourly prices.
    pub fn with_asset(
        mut self,
        network: &Network,
        asset: &Address,
        id: &str,
        points: &[(Timestamp, f64)],
    ) -> Self {
        let price_id = format!("mock:{id}");
        self.assets.insert(
            (network.clone(), asset.clone()),
            AssetEntry {
                price_id,
                decimals: Some(18),
                symbol: Some(id.to_uppercase()),
            },
        );
        self.series.insert(
            id.to_owned(),
            points
                .iter()
                .map(|(timestamp, price_usd)| PricePoint {
                    timestamp: *timestamp,
                    price_usd: *price_usd,
                })
                .collect(),
        );
        self
    }

    /// `(id, from, to)` of every range fetched.
    pub fn fetches(&self) -> Vec<(String, Timestamp, Timestamp)> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn resolve_asset(
        &self,
        network: &Network,
        asset: &Address,
    ) -> Result<Option<AssetEntry>, PriceSourceError> {
        Ok(self.assets.get(&(network.clone(), asset.clone())).cloned())
    }

    async fn fetch_range(
        &self,
        price_id: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<PricePoint>, PriceSourceError> {
        self.fetches
            .lock()
            .unwrap()
            .push((price_id.to_owned(), from, to));

        Ok(self
            .series
            .get(price_id)
            .map(|points| {
                points
                    .iter()
                    .filter(|point| (from..=to).contains(&point.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
