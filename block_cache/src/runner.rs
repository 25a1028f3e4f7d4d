use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use shared::block_cache::{BlockCache, CacheBuilder, CacheError, FillReport};
use shared::day::iterate_dates;
use shared::network::Network;

/// A cache file written by [`build`] or [`repair`].
#[derive(Debug, Clone)]
pub struct Written {
    pub path: PathBuf,
    pub cache: BlockCache,
    pub report: FillReport,
}

fn range_path(
    dir: &Path,
    network: &Network,
    start: NaiveDate,
    end: NaiveDate,
) -> PathBuf {
    dir.join(BlockCache::file_name(network, start, end))
}

async fn fill_and_save(
    builder: &CacheBuilder<'_>,
    mut cache: BlockCache,
    path: PathBuf,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Written, CacheError> {
    let report = builder
        .fill_missing(&mut cache, iterate_dates(start, end))
        .await;
    cache.save(&path)?;

    tracing::info!(
        network = %cache.network(),
        path = %path.display(),
        added = report.added.len(),
        failed = report.failed.len(),
        dates = cache.len(),
        "Saved block cache"
    );

    Ok(Written {
        path,
        cache,
        report,
    })
}

/// Resolves `start..=end` into `{network}_blocks_{start}_{end}.json`. Dates
/// already in that file are kept.
pub async fn build(
    builder: &CacheBuilder<'_>,
    dir: &Path,
    network: &Network,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Written, CacheError> {
    let path = range_path(dir, network, start, end);
    let cache = BlockCache::load(&path, network.clone())?;

    fill_and_save(builder, cache, path, start, end).await
}

/// Like [`build`], but dates found in any cache file of the network are
/// reused instead of resolved again.
pub async fn repair(
    builder: &CacheBuilder<'_>,
    dir: &Path,
    network: &Network,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Written, CacheError> {
    let path = range_path(dir, network, start, end);
    let cache = BlockCache::load_network(dir, network)?.restricted(start, end);

    fill_and_save(builder, cache, path, start, end).await
}
