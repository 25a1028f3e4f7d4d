use std::fs;
use std::sync::Arc;
use std::time::Duration;

use block_cache::runner::{build, repair};
use chrono::NaiveDate;
use shared::block_cache::{BlockCache, CacheBuilder};
use shared::day::Calendar;
use shared::network::Network;
use shared::retry::RetryPolicy;
use test_helpers::chain::{mock_pool, MockChain};

// 2023-12-31T00:00:00Z
const GENESIS: i64 = 1_703_980_800;

fn date(raw: &str) -> NaiveDate {
    raw.parse().unwrap()
}

fn builder(pool: &shared::pool::ConnectionPool) -> CacheBuilder<'_> {
    let policy = RetryPolicy {
        max_attempts: 2,
        base: Duration::from_millis(1),
        cap: Duration::from_millis(2),
    };

    CacheBuilder {
        call_policy: policy,
        date_policy: policy,
        concurrency: 2,
        ..CacheBuilder::new(pool, Calendar::default())
    }
}

#[tokio::test]
async fn build_writes_the_range_file() {
    let dir = tempfile::tempdir().unwrap();
    let network = Network::new("ethereum");
    let chain = Arc::new(MockChain::new().with_blocks(GENESIS, 600, 2_000));
    let pool = mock_pool(&network, &chain);

    let written = build(
        &builder(&pool),
        dir.path(),
        &network,
        date("2024-01-01"),
        date("2024-01-05"),
    )
    .await
    .unwrap();

    assert_eq!(
        written.path,
        dir.path().join("ethereum_blocks_2024-01-01_2024-01-05.json")
    );
    assert_eq!(written.report.added.len(), 5);
    let saved = BlockCache::load(&written.path, network).unwrap();
    assert_eq!(saved, written.cache);
}

#[tokio::test]
async fn repair_reuses_other_ranges_and_keeps_entries() {
    let dir = tempfile::tempdir().unwrap();
    let network = Network::new("ethereum");
    let chain = Arc::new(MockChain::new().with_blocks(GENESIS, 600, 2_000));
    let pool = mock_pool(&network, &chain);
    let builder = builder(&pool);

    let january = build(
        &builder,
        dir.path(),
        &network,
        date("2024-01-01"),
        date("2024-01-04"),
    )
    .await
    .unwrap();
    let before = fs::read_to_string(&january.path).unwrap();

    chain.reset_counts();
    let repaired = repair(
        &builder,
        dir.path(),
        &network,
        date("2024-01-02"),
        date("2024-01-06"),
    )
    .await
    .unwrap();

    assert_eq!(
        repaired.report.added,
        vec![date("2024-01-05"), date("2024-01-06")]
    );
    for day in ["2024-01-02", "2024-01-03", "2024-01-04"] {
        assert_eq!(
            repaired.cache.get(&date(day)),
            january.cache.get(&date(day))
        );
    }
    assert!(repaired.cache.get(&date("2024-01-01")).is_none());
    assert_eq!(fs::read_to_string(&january.path).unwrap(), before);

    // A second repair has nothing left to resolve.
    chain.reset_counts();
    let again = repair(
        &builder,
        dir.path(),
        &network,
        date("2024-01-02"),
        date("2024-01-06"),
    )
    .await
    .unwrap();
    assert!(again.report.added.is_empty());
    assert_eq!(chain.requests(), 0);
    assert_eq!(again.cache, repaired.cache);
}

#[tokio::test]
async fn unresolvable_dates_stay_out_of_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let network = Network::new("ethereum");
    // Blocks every ten minutes for about three days.
    let chain = Arc::new(MockChain::new().with_blocks(GENESIS, 600, 450));
    let pool = mock_pool(&network, &chain);

    let written = build(
        &builder(&pool),
        dir.path(),
        &network,
        date("2024-01-01"),
        date("2024-01-04"),
    )
    .await
    .unwrap();

    assert!(written.cache.get(&date("2024-01-01")).is_some());
    assert!(written.cache.get(&date("2024-01-04")).is_none());
    assert!(written
        .report
        .failed
        .iter()
        .any(|(day, _)| *day == date("2024-01-04")));

    let saved = BlockCache::load(&written.path, network).unwrap();
    assert_eq!(saved, written.cache);
}
