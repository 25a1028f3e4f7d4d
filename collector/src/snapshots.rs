use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use shared::adapter::Snapshot;
use shared::block_cache::{
    BlockCache, CacheBuilder, CacheError, DateBlockEntry,
};
use shared::network::Network;
use shared::resolver::ResolveError;

struct Book {
    cache: BlockCache,
    resolved: usize,
}

/// Snapshot blocks of every network of a run: the merged on-disk caches,
/// extended with dates resolved while the run goes.
pub struct Snapshots<'a> {
    builder: CacheBuilder<'a>,
    dir: PathBuf,
    books: Mutex<HashMap<Network, Book>>,
}

impl<'a> Snapshots<'a> {
    pub fn load(
        builder: CacheBuilder<'a>,
        dir: &Path,
        networks: impl IntoIterator<Item = Network>,
    ) -> Result<Self, CacheError> {
        let mut books = HashMap::new();
        for network in networks {
            let cache = BlockCache::load_network(dir, &network)?;
            books.insert(network, Book { cache, resolved: 0 });
        }

        Ok(Self {
            builder,
            dir: dir.to_owned(),
            books: Mutex::new(books),
        })
    }

    fn cached(
        &self,
        network: &Network,
        date: &NaiveDate,
    ) -> Option<DateBlockEntry> {
        let books = self.books.lock().ok()?;
        books.get(network)?.cache.get(date).copied()
    }

    fn remember(
        &self,
        network: &Network,
        date: NaiveDate,
        entry: DateBlockEntry,
    ) {
        if let Ok(mut books) = self.books.lock() {
            let book = books.entry(network.clone()).or_insert_with(|| Book {
                cache: BlockCache::new(network.clone()),
                resolved: 0,
            });
            if book.cache.insert(date, entry) {
                book.resolved += 1;
            }
        }
    }

    /// Snapshot entry of `date`, resolved through the pool when the caches
    /// do not have it yet.
    pub async fn entry(
        &self,
        network: &Network,
        date: NaiveDate,
    ) -> Result<DateBlockEntry, ResolveError> {
        if let Some(entry) = self.cached(network, &date) {
            return Ok(entry);
        }

        let entry = self
            .builder
            .date_policy
            .run("resolve_date", || self.builder.resolve_date(network, date))
            .await?;
        tracing::info!(
            network = %network,
            %date,
            block = entry.block,
            "Resolved missing snapshot block"
        );
        self.remember(network, date, entry);

        // A concurrent task may have resolved it first.
        Ok(self.cached(network, &date).unwrap_or(entry))
    }

    /// The snapshot of `date` and the first block of that day, which is the
    /// block after the previous day's snapshot.
    pub async fn snapshot(
        &self,
        network: &Network,
        date: NaiveDate,
    ) -> Result<Snapshot, ResolveError> {
        let entry = self.entry(network, date).await?;
        let first_block = match date.pred_opt() {
            Some(previous) => self.entry(network, previous).await?.block + 1,
            None => 1,
        };

        Ok(Snapshot {
            date,
            entry,
            first_block: first_block.min(entry.block),
        })
    }

    /// Writes one cache file per network that gained dates during the run.
    pub fn persist(&self) -> Result<Vec<PathBuf>, CacheError> {
        let Ok(mut books) = self.books.lock() else {
            return Ok(Vec::new());
        };

        let mut written = Vec::new();
        for (network, book) in books.iter_mut() {
            if book.resolved == 0 {
                continue;
            }
            let entries = book.cache.entries();
            let (Some(first), Some(last)) =
                (entries.keys().next(), entries.keys().next_back())
            else {
                continue;
            };

            let path =
                self.dir.join(BlockCache::file_name(network, *first, *last));
            book.cache.save(&path)?;
            tracing::info!(
                network = %network,
                added = book.resolved,
                path = %path.display(),
                "Persisted block cache"
            );
            book.resolved = 0;
            written.push(path);
        }

        Ok(written)
    }
}
