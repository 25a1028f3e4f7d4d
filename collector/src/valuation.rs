use pricing::cache::PriceCache;
use serde_json::Value;
use shared::adapter::Fields;
use shared::block::Timestamp;
use shared::id::Address;
use shared::network::Network;

/// Prices decoded records that name an `asset`.
pub struct Valuation {
    cache: PriceCache,
}

impl Valuation {
    pub fn new(cache: PriceCache) -> Self {
        Self { cache }
    }

    /// Sets `price_usd` on `fields` when they carry an `asset` address:
    /// the as-of price at `at`, or null while the price is not cached yet.
    pub fn apply(&self, network: &Network, at: Timestamp, fields: &mut Fields) {
        let Some(asset) = fields
            .get("asset")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<Address>().ok())
        else {
            return;
        };

        let price = self
            .cache
            .lookup(network, &asset, at)
            .map_or(Value::Null, Value::from);
        fields.insert("price_usd".to_owned(), price);
    }

    /// Writes the lookups that missed to the backfill request files.
    pub fn flush(&self) -> anyhow::Result<usize> {
        let queued = self.cache.flush_requests()?;
        if queued > 0 {
            tracing::info!(queued, "Queued price backfill requests");
        }
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use pricing::series::{PricePoint, PriceSeries, ToleranceTiers};
    use pricing::store::PriceStore;

    use super::*;

    const DAI: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";

    #[test]
    fn only_records_with_an_asset_are_priced() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            PriceStore::new(dir.path().join("prices"), dir.path().join("req"));
        let network = Network::new("ethereum");
        store
            .save_series(
                &network,
                &DAI.parse().unwrap(),
                &PriceSeries::from_points(vec![PricePoint {
                    timestamp: 1_000,
                    price_usd: 0.999,
                }]),
            )
            .unwrap();
        let valuation = Valuation::new(PriceCache::new(
            store.clone(),
            ToleranceTiers::default(),
        ));

        let mut priced = Fields::new();
        priced.insert("asset".to_owned(), Value::from(DAI));
        valuation.apply(&network, 2_000, &mut priced);
        assert_eq!(priced["price_usd"], 0.999);

        let mut early = priced.clone();
        valuation.apply(&network, 500, &mut early);
        assert_eq!(early["price_usd"], Value::Null);

        let mut plain = Fields::new();
        plain.insert("amount".to_owned(), Value::from(1));
        valuation.apply(&network, 2_000, &mut plain);
        assert!(!plain.contains_key("price_usd"));

        assert_eq!(valuation.flush().unwrap(), 1);
        assert_eq!(
            store
                .load_requests(&network, &DAI.parse().unwrap())
                .unwrap()
                .len(),
            1
        );
    }
}
