use std::collections::BTreeSet;

use anyhow::Context;
use shared::block::Timestamp;
use shared::id::Address;
use shared::network::Network;

use crate::registry::AssetRegistry;
use crate::series::{PriceSeries, ToleranceTiers};
use crate::source::PriceSource;
use crate::store::PriceStore;

/// What happened to one asset's requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Every requested timestamp now has a price.
    Complete { satisfied: usize },
    /// Some timestamps are still without a price.
    Partial { satisfied: usize, remaining: usize },
    /// The asset could not be backfilled, its requests are kept.
    Skipped { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub assets: Vec<(Network, Address, AssetOutcome)>,
    pub fetched_points: usize,
}

impl BackfillReport {
    pub fn remaining(&self) -> usize {
        self.assets
            .iter()
            .map(|(_, _, outcome)| match outcome {
                AssetOutcome::Partial { remaining, .. } => *remaining,
                _ => 0,
            })
            .sum()
    }

    pub fn skipped(&self) -> usize {
        self.assets
            .iter()
            .filter(|(_, _, outcome)| {
                matches!(outcome, AssetOutcome::Skipped { .. })
            })
            .count()
    }
}

fn unmet(
    requested: &BTreeSet<Timestamp>,
    series: &PriceSeries,
    tiers: &ToleranceTiers,
) -> BTreeSet<Timestamp> {
    requested
        .iter()
        .copied()
        .filter(|at| tiers.lookup(series, *at).is_none())
        .collect()
}

pub struct Backfill<'a> {
    pub store: &'a PriceStore,
    pub registry: &'a mut AssetRegistry,
    pub source: &'a dyn PriceSource,
    pub tiers: &'a ToleranceTiers,
}

impl Backfill<'_> {
    /// Drops the requests `series` now satisfies. The file is read again, so
    /// timestamps queued during the fetch are kept.
    fn prune(
        &self,
        network: &Network,
        asset: &Address,
        series: &PriceSeries,
    ) -> anyhow::Result<()> {
        let current = self.store.load_requests(network, asset)?;
        self.store
            .save_requests(network, asset, &unmet(&current, series, self.tiers))
    }

    /// Resolves every pending request file, one bounded fetch per asset.
    pub async fn run(&mut self) -> anyhow::Result<BackfillReport> {
        let mut report = BackfillReport::default();

        for (network, asset) in self.store.pending_assets()? {
            let outcome = match self.asset(&network, &asset).await {
                Ok((outcome, fetched)) => {
                    report.fetched_points += fetched;
                    outcome
                }
                Err(reason) => {
                    tracing::warn!(
                        network = %network,
                        %asset,
                        ?reason,
                        "Backfill failed"
                    );
                    AssetOutcome::Skipped {
                        reason: format!("{reason:#}"),
                    }
                }
            };

            tracing::info!(network = %network, %asset, ?outcome, "Backfilled");
            report.assets.push((network, asset, outcome));
        }

        Ok(report)
    }

    async fn asset(
        &mut self,
        network: &Network,
        asset: &Address,
    ) -> anyhow::Result<(AssetOutcome, usize)> {
        let requested = self.store.load_requests(network, asset)?;
        let mut series = self.store.load_series(network, asset)?;

        let pending = unmet(&requested, &series, self.tiers);
        let (Some(first), Some(last)) =
            (pending.first().copied(), pending.last().copied())
        else {
            self.prune(network, asset, &series)?;
            return Ok((
                AssetOutcome::Complete {
                    satisfied: requested.len(),
                },
                0,
            ));
        };

        let entry = match self.registry.get(network, asset) {
            Some(entry) => entry.clone(),
            None => {
                let Some(entry) = self
                    .source
                    .resolve_asset(network, asset)
                    .await
                    .context("Asset lookup failed")?
                else {
                    return Ok((
                        AssetOutcome::Skipped {
                            reason: "unknown to the price source".to_owned(),
                        },
                        0,
                    ));
                };
                tracing::info!(
                    network = %network,
                    %asset,
                    price_id = %entry.price_id,
                    "Registered asset"
                );
                self.registry.insert(network, asset, entry.clone())?;
                entry
            }
        };

        let id = match entry.source_and_id() {
            Some((source, id)) if source == self.source.name() => id,
            _ => {
                return Ok((
                    AssetOutcome::Skipped {
                        reason: format!(
                            "price id {} is not served by {}",
                            entry.price_id,
                            self.source.name()
                        ),
                    },
                    0,
                ))
            }
        };

        // The earliest timestamp needs a point up to one tolerance before it.
        let points = self
            .source
            .fetch_range(id, first - self.tiers.primary(), last)
            .await
            .context("Price range fetch failed")?;
        let fetched = points.len();

        series.merge(points);
        self.store.save_series(network, asset, &series)?;

        self.prune(network, asset, &series)?;
        let remaining = unmet(&requested, &series, self.tiers);

        let satisfied = requested.len() - remaining.len();
        let outcome = if remaining.is_empty() {
            AssetOutcome::Complete { satisfied }
        } else {
            AssetOutcome::Partial {
                satisfied,
                remaining: remaining.len(),
            }
        };

        Ok((outcome, fetched))
    }
}
