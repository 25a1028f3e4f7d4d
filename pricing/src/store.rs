use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use shared::block::Timestamp;
use shared::id::Address;
use shared::network::Network;
use shared::utils::write_atomic;

use crate::series::{PricePoint, PriceSeries};

const REQUEST_PREFIX: &str = "missing_";

#[derive(Debug, Serialize, Deserialize)]
struct RequestRow {
    timestamp: Timestamp,
}

/// CSV files of the price cache: one series per asset and one request file
/// per asset with unresolved lookups.
#[derive(Debug, Clone)]
pub struct PriceStore {
    cache_dir: PathBuf,
    requests_dir: PathBuf,
}

fn read_rows<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> anyhow::Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_rows<T: Serialize>(
    path: &Path,
    header: &[&str],
    rows: impl IntoIterator<Item = T>,
) -> anyhow::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    let contents = writer.into_inner().map_err(|e| e.into_error())?;

    write_atomic(path, &contents)
}

impl PriceStore {
    pub fn new(cache_dir: PathBuf, requests_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            requests_dir,
        }
    }

    pub fn series_path(&self, network: &Network, asset: &Address) -> PathBuf {
        self.cache_dir.join(format!("{network}_{asset}.csv"))
    }

    pub fn request_path(&self, network: &Network, asset: &Address) -> PathBuf {
        self.requests_dir
            .join(format!("{REQUEST_PREFIX}{network}_{asset}.csv"))
    }

    pub fn load_series(
        &self,
        network: &Network,
        asset: &Address,
    ) -> anyhow::Result<PriceSeries> {
        let points = read_rows(&self.series_path(network, asset))?;
        Ok(PriceSeries::from_points(points))
    }

    pub fn save_series(
        &self,
        network: &Network,
        asset: &Address,
        series: &PriceSeries,
    ) -> anyhow::Result<()> {
        write_rows::<&PricePoint>(
            &self.series_path(network, asset),
            &["timestamp", "price_usd"],
            series.points(),
        )
    }

    pub fn load_requests(
        &self,
        network: &Network,
        asset: &Address,
    ) -> anyhow::Result<BTreeSet<Timestamp>> {
        let rows: Vec<RequestRow> =
            read_rows(&self.request_path(network, asset))?;
        Ok(rows.into_iter().map(|row| row.timestamp).collect())
    }

    /// Replaces the request file, deleting it when nothing is pending.
    pub fn save_requests(
        &self,
        network: &Network,
        asset: &Address,
        timestamps: &BTreeSet<Timestamp>,
    ) -> anyhow::Result<()> {
        let path = self.request_path(network, asset);

        if timestamps.is_empty() {
            return match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(
                    anyhow::Error::new(e)
                        .context(format!("Failed to remove {}", path.display())),
                ),
                _ => Ok(()),
            };
        }

        write_rows(
            &path,
            &["timestamp"],
            timestamps.iter().map(|timestamp| RequestRow {
                timestamp: *timestamp,
            }),
        )
    }

    /// Adds `timestamps` to the asset's request file. Returns how many were
    /// not requested yet.
    pub fn add_requests(
        &self,
        network: &Network,
        asset: &Address,
        timestamps: impl IntoIterator<Item = Timestamp>,
    ) -> anyhow::Result<usize> {
        let mut pending = self.load_requests(network, asset)?;
        let before = pending.len();
        pending.extend(timestamps);

        let added = pending.len() - before;
        if added > 0 {
            self.save_requests(network, asset, &pending)?;
        }
        Ok(added)
    }

    /// Every (network, asset) with a request file.
    pub fn pending_assets(&self) -> anyhow::Result<Vec<(Network, Address)>> {
        let listing = match fs::read_dir(&self.requests_dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e.into()),
        };

        let mut assets = Vec::new();
        for entry in listing {
            let name = entry?.file_name().to_string_lossy().into_owned();
            match parse_request_name(&name) {
                Some(asset) => assets.push(asset),
                None if name.starts_with(REQUEST_PREFIX) => {
                    tracing::warn!(file = %name, "Ignoring request file")
                }
                None => {}
            }
        }
        assets.sort();

        Ok(assets)
    }
}

fn parse_request_name(name: &str) -> Option<(Network, Address)> {
    let core = name.strip_prefix(REQUEST_PREFIX)?.strip_suffix(".csv")?;
    let (network, asset) = core.rsplit_once('_')?;

    Some((Network::new(network), asset.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSET: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";

    fn store(dir: &Path) -> PriceStore {
        PriceStore::new(dir.join("pricing"), dir.join("pricing/requests"))
    }

    #[test]
    fn series_files_round_trip_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let (network, asset): (Network, Address) =
            ("ethereum".into(), ASSET.parse().unwrap());

        assert!(store.load_series(&network, &asset).unwrap().is_empty());

        let series = PriceSeries::from_points(vec![
            PricePoint {
                timestamp: 200,
                price_usd: 1.01,
            },
            PricePoint {
                timestamp: 100,
                price_usd: 0.99,
            },
        ]);
        store.save_series(&network, &asset, &series).unwrap();

        let raw =
            fs::read_to_string(store.series_path(&network, &asset)).unwrap();
        assert!(raw.starts_with("timestamp,price_usd\n100,0.99\n"));
        assert_eq!(store.load_series(&network, &asset).unwrap(), series);
    }

    #[test]
    fn request_files_are_deduplicated_and_removed_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let (network, asset): (Network, Address) =
            ("base".into(), ASSET.parse().unwrap());

        assert_eq!(store.add_requests(&network, &asset, [30, 10]).unwrap(), 2);
        assert_eq!(store.add_requests(&network, &asset, [10, 20]).unwrap(), 1);
        assert_eq!(
            store.load_requests(&network, &asset).unwrap(),
            BTreeSet::from([10, 20, 30])
        );
        assert_eq!(
            store.pending_assets().unwrap(),
            [(network.clone(), asset.clone())]
        );

        store
            .save_requests(&network, &asset, &BTreeSet::new())
            .unwrap();
        assert!(!store.request_path(&network, &asset).exists());
        assert!(store.pending_assets().unwrap().is_empty());
    }

    #[test]
    fn request_names_are_parsed() {
        assert_eq!(
            parse_request_name(&format!("missing_ethereum_{ASSET}.csv")),
            Some(("ethereum".into(), ASSET.parse().unwrap()))
        );
        assert_eq!(parse_request_name("missing_ethereum_0x12.csv"), None);
        assert_eq!(parse_request_name("ethereum_0x12.csv"), None);
    }
}
