use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::{BlockNumber, Timestamp};
use crate::day::Calendar;
use crate::eth;
use crate::network::Network;
use crate::pool::ConnectionPool;
use crate::resolver::{block_for_timestamp, ResolveError};
use crate::retry::RetryPolicy;
use crate::utils::{read_json, write_json_atomic};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to load block cache {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("Failed to persist block cache {path}: {reason}")]
    Persist { path: PathBuf, reason: String },
}

/// Snapshot block of one calendar day on one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateBlockEntry {
    pub block: BlockNumber,
    pub timestamp: Timestamp,
    #[serde(rename = "ts_start_utc")]
    pub window_start: Timestamp,
    #[serde(rename = "ts_end_utc")]
    pub window_end: Timestamp,
}

/// Date to snapshot block mapping of one network. Entries are never
/// overwritten once present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCache {
    network: Network,
    entries: BTreeMap<NaiveDate, DateBlockEntry>,
}

impl BlockCache {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            entries: BTreeMap::new(),
        }
    }

    pub fn file_name(
        network: &Network,
        start: NaiveDate,
        end: NaiveDate,
    ) -> String {
        format!("{network}_blocks_{start}_{end}.json")
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn entries(&self) -> &BTreeMap<NaiveDate, DateBlockEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, date: &NaiveDate) -> Option<&DateBlockEntry> {
        self.entries.get(date)
    }

    /// Adds `entry` unless `date` is already cached. Returns whether it was
    /// added.
    pub fn insert(&mut self, date: NaiveDate, entry: DateBlockEntry) -> bool {
        if self.entries.contains_key(&date) {
            return false;
        }
        self.entries.insert(date, entry);
        true
    }

    pub fn missing(
        &self,
        dates: impl IntoIterator<Item = NaiveDate>,
    ) -> Vec<NaiveDate> {
        dates
            .into_iter()
            .filter(|date| !self.entries.contains_key(date))
            .collect()
    }

    /// Entries within `[start, end]`.
    pub fn restricted(&self, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            network: self.network.clone(),
            entries: self
                .entries
                .range(start..=end)
                .map(|(date, entry)| (*date, *entry))
                .collect(),
        }
    }

    pub fn load(path: &Path, network: Network) -> Result<Self, CacheError> {
        let entries = read_json(path)
            .map_err(|e| CacheError::Load {
                path: path.to_owned(),
                reason: format!("{e:#}"),
            })?
            .unwrap_or_default();

        Ok(Self { network, entries })
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        write_json_atomic(path, &self.entries).map_err(|e| {
            CacheError::Persist {
                path: path.to_owned(),
                reason: format!("{e:#}"),
            }
        })
    }

    /// Merges every cache file of `network` found in `dir`, whatever date
    /// range it was built for.
    pub fn load_network(
        dir: &Path,
        network: &Network,
    ) -> Result<Self, CacheError> {
        let mut cache = Self::new(network.clone());
        let prefix = format!("{network}_blocks_");

        let listing = match std::fs::read_dir(dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(cache)
            }
            Err(e) => {
                return Err(CacheError::Load {
                    path: dir.to_owned(),
                    reason: e.to_string(),
                })
            }
        };

        let mut paths: Vec<PathBuf> = listing
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| {
                        name.starts_with(&prefix) && name.ends_with(".json")
                    })
            })
            .collect();
        paths.sort();

        for path in &paths {
            let file = Self::load(path, network.clone())?;
            for (date, entry) in file.entries {
                cache.insert(date, entry);
            }
        }

        tracing::debug!(
            network = %network,
            files = paths.len(),
            dates = cache.len(),
            "Loaded block caches"
        );

        Ok(cache)
    }
}

/// Outcome of a fill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillReport {
    pub added: Vec<NaiveDate>,
    pub failed: Vec<(NaiveDate, String)>,
}

/// Resolves calendar dates into snapshot blocks.
#[derive(Clone, Copy)]
pub struct CacheBuilder<'a> {
    pub pool: &'a ConnectionPool,
    pub calendar: Calendar,
    /// Retries of single RPC calls within a search.
    pub call_policy: RetryPolicy,
    /// Retries of a whole date resolution.
    pub date_policy: RetryPolicy,
    pub concurrency: usize,
}

impl<'a> CacheBuilder<'a> {
    pub fn new(pool: &'a ConnectionPool, calendar: Calendar) -> Self {
        Self {
            pool,
            calendar,
            call_policy: RetryPolicy::default(),
            date_policy: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            concurrency: 1,
        }
    }

    /// Last block of `date`: the first block at or after the next local
    /// midnight, minus one.
    pub async fn resolve_date(
        &self,
        network: &Network,
        date: NaiveDate,
    ) -> Result<DateBlockEntry, ResolveError> {
        let (window_start, window_end) = self.calendar.window(date);
        let found = block_for_timestamp(
            self.pool,
            network,
            window_end,
            self.call_policy,
        )
        .await?;

        let block = found.number.saturating_sub(1).max(1);
        let header = self
            .call_policy
            .run("eth_getBlockByNumber", || {
                eth::block_header(self.pool, network, block)
            })
            .await?;

        Ok(DateBlockEntry {
            block,
            timestamp: header.timestamp,
            window_start,
            window_end,
        })
    }

    pub async fn build(
        &self,
        network: &Network,
        dates: impl IntoIterator<Item = NaiveDate>,
    ) -> (BlockCache, FillReport) {
        let mut cache = BlockCache::new(network.clone());
        let report = self.fill_missing(&mut cache, dates).await;
        (cache, report)
    }

    /// Resolves only the dates absent from `cache`. Dates that keep failing
    /// stay absent so a later pass retries them.
    pub async fn fill_missing(
        &self,
        cache: &mut BlockCache,
        dates: impl IntoIterator<Item = NaiveDate>,
    ) -> FillReport {
        let network = cache.network().clone();
        let missing = cache.missing(dates);
        let total = missing.len();
        let mut report = FillReport::default();

        if missing.is_empty() {
            tracing::info!(network = %network, "Block cache complete");
            return report;
        }

        let mut results = stream::iter(missing)
            .map(|date| {
                let network = &network;
                async move {
                    let result = self
                        .date_policy
                        .run("resolve_date", || {
                            self.resolve_date(network, date)
                        })
                        .await;
                    (date, result)
                }
            })
            .buffer_unordered(self.concurrency.max(1));

        let mut done = 0;
        while let Some((date, result)) = results.next().await {
            done += 1;
            match result {
                Ok(entry) => {
                    tracing::info!(
                        network = %network,
                        %date,
                        block = entry.block,
                        progress = %format!("{done}/{total}"),
                        "Resolved date"
                    );
                    cache.insert(date, entry);
                    report.added.push(date);
                }
                Err(error) => {
                    tracing::warn!(
                        network = %network,
                        %date,
                        %error,
                        "Failed to resolve date"
                    );
                    report.failed.push((date, error.to_string()));
                }
            }
        }

        report.added.sort();
        report.failed.sort();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(block: BlockNumber) -> DateBlockEntry {
        DateBlockEntry {
            block,
            timestamp: block as Timestamp * 10,
            window_start: 0,
            window_end: 1,
        }
    }

    fn date(raw: &str) -> NaiveDate {
        raw.parse().unwrap()
    }

    #[test]
    fn entries_are_never_overwritten() {
        let mut cache = BlockCache::new("ethereum".into());

        assert!(cache.insert(date("2024-01-01"), entry(10)));
        assert!(!cache.insert(date("2024-01-01"), entry(20)));
        assert_eq!(cache.get(&date("2024-01-01")), Some(&entry(10)));
    }

    #[test]
    fn files_keep_the_date_keyed_layout() {
        let dir = tempfile::tempdir().unwrap();
        let network = Network::new("base");
        let path = dir.path().join(BlockCache::file_name(
            &network,
            date("2024-01-01"),
            date("2024-01-02"),
        ));

        let mut cache = BlockCache::new(network.clone());
        cache.insert(date("2024-01-01"), entry(7));
        cache.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["2024-01-01"]["block"], 7);
        assert_eq!(raw["2024-01-01"]["ts_end_utc"], 1);
        assert!(path.ends_with("base_blocks_2024-01-01_2024-01-02.json"));

        assert_eq!(BlockCache::load(&path, network).unwrap(), cache);
    }

    #[test]
    fn all_files_of_a_network_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let network = Network::new("base");

        let mut january = BlockCache::new(network.clone());
        january.insert(date("2024-01-01"), entry(1));
        january.insert(date("2024-01-02"), entry(2));
        january
            .save(&dir.path().join("base_blocks_2024-01-01_2024-01-02.json"))
            .unwrap();

        let mut overlap = BlockCache::new(network.clone());
        overlap.insert(date("2024-01-02"), entry(99));
        overlap.insert(date("2024-01-03"), entry(3));
        overlap
            .save(&dir.path().join("base_blocks_2024-01-02_2024-01-03.json"))
            .unwrap();

        let mut other = BlockCache::new("ethereum".into());
        other.insert(date("2024-01-04"), entry(4));
        other
            .save(&dir.path().join("ethereum_blocks_2024-01-04_2024-01-04.json"))
            .unwrap();

        let merged = BlockCache::load_network(dir.path(), &network).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get(&date("2024-01-02")), Some(&entry(2)));

        let missing = merged.missing(crate::day::iterate_dates(
            date("2024-01-01"),
            date("2024-01-05"),
        ));
        assert_eq!(missing, [date("2024-01-04"), date("2024-01-05")]);
    }
}
