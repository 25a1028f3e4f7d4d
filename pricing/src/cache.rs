use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use shared::block::Timestamp;
use shared::id::Address;
use shared::network::Network;

use crate::series::{PriceSeries, ToleranceTiers};
use crate::store::PriceStore;

type AssetKey = (Network, Address);

/// As-of price lookups over the on-disk series. A miss is queued for the
/// backfill pass instead of failing the caller.
pub struct PriceCache {
    store: PriceStore,
    tiers: ToleranceTiers,
    series: Mutex<HashMap<AssetKey, PriceSeries>>,
    pending: Mutex<HashMap<AssetKey, BTreeSet<Timestamp>>>,
}

impl PriceCache {
    pub fn new(store: PriceStore, tiers: ToleranceTiers) -> Self {
        Self {
            store,
            tiers,
            series: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn tiers(&self) -> &ToleranceTiers {
        &self.tiers
    }

    /// USD price of `asset` as of `at`, or `None` when no cached point is
    /// close enough yet. Misses are remembered until [`Self::flush_requests`].
    pub fn lookup(
        &self,
        network: &Network,
        asset: &Address,
        at: Timestamp,
    ) -> Option<f64> {
        let key = (network.clone(), asset.clone());

        let found = match self.series.lock() {
            Ok(mut series) => {
                let series = series.entry(key.clone()).or_insert_with(|| {
                    self.store.load_series(network, asset).unwrap_or_else(
                        |reason| {
                            tracing::warn!(
                                network = %network,
                                %asset,
                                ?reason,
                                "Unreadable price series, treating as empty"
                            );
                            PriceSeries::default()
                        },
                    )
                });
                self.tiers.lookup(series, at)
            }
            Err(_) => None,
        };

        if found.is_none() {
            if let Ok(mut pending) = self.pending.lock() {
                pending.entry(key).or_default().insert(at);
            }
        }

        found.map(|point| point.price_usd)
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .map(|pending| pending.values().map(BTreeSet::len).sum())
            .unwrap_or_default()
    }

    /// Appends queued misses to the request files. Returns how many
    /// timestamps were newly requested.
    pub fn flush_requests(&self) -> anyhow::Result<usize> {
        let drained: Vec<(AssetKey, BTreeSet<Timestamp>)> = match self
            .pending
            .lock()
        {
            Ok(mut pending) => pending.drain().collect(),
            Err(_) => anyhow::bail!("price request queue poisoned"),
        };

        let mut added = 0;
        for ((network, asset), timestamps) in drained {
            added += self.store.add_requests(&network, &asset, timestamps)?;
        }

        Ok(added)
    }
}
