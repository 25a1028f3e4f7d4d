use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use shared::block_cache::{BlockCache, CacheBuilder};
use shared::day::{iterate_dates, Calendar};
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
        max_attempts: 3,
        base: Duration::from_millis(1),
        cap: Duration::from_millis(4),
    };

    CacheBuilder {
        call_policy: policy,
        date_policy: policy,
        concurrency: 3,
        ..CacheBuilder::new(pool, Calendar::default())
    }
}

#[tokio::test]
async fn snapshot_is_the_last_block_before_next_midnight() {
    let network = Network::new("ethereum");
    // One block every 7 minutes for twelve days.
    let chain = Arc::new(MockChain::new().with_blocks(GENESIS, 420, 2_500));
    let pool = mock_pool(&network, &chain);

    let (cache, report) = builder(&pool)
        .build(&network, iterate_dates(date("2024-01-01"), date("2024-01-05")))
        .await;

    assert!(report.failed.is_empty());
    assert_eq!(report.added.len(), 5);

    for (day, entry) in cache.entries() {
        let (start, end) = Calendar::default().window(*day);
        assert_eq!((entry.window_start, entry.window_end), (start, end));

        let block_ts = chain.timestamp_of(entry.block).unwrap();
        let next_ts = chain.timestamp_of(entry.block + 1).unwrap();
        assert_eq!(entry.timestamp, block_ts);
        assert!(block_ts < end && end <= next_ts, "{day}");
    }

    // New York midnight of 2024-01-02 is 05:00 UTC.
    assert_eq!(
        cache.get(&date("2024-01-01")).unwrap().window_end,
        1_704_171_600
    );
}

#[tokio::test]
async fn filling_a_complete_cache_costs_nothing() {
    let network = Network::new("ethereum");
    let chain = Arc::new(MockChain::new().with_blocks(GENESIS, 420, 2_500));
    let pool = mock_pool(&network, &chain);
    let builder = builder(&pool);
    let dates = || iterate_dates(date("2024-01-01"), date("2024-01-04"));

    let (mut cache, _) = builder.build(&network, dates()).await;
    let before = cache.clone();
    chain.reset_counts();

    let report = builder.fill_missing(&mut cache, dates()).await;
    assert!(report.added.is_empty());
    assert_eq!(chain.requests(), 0);
    assert_eq!(cache, before);

    let report = builder
        .fill_missing(
            &mut cache,
            iterate_dates(date("2024-01-01"), date("2024-01-05")),
        )
        .await;
    assert_eq!(report.added, [date("2024-01-05")]);
    assert_eq!(cache.len(), 5);
    for (day, entry) in before.entries() {
        assert_eq!(cache.get(day), Some(entry));
    }
}

#[tokio::test]
async fn dates_past_the_head_stay_missing() {
    let network = Network::new("ethereum");
    // Chain ends on 2024-01-03 UTC.
    let chain = Arc::new(MockChain::new().with_blocks(GENESIS, 3_600, 80));
    let pool = mock_pool(&network, &chain);

    let mut cache = BlockCache::new(network.clone());
    let report = builder(&pool)
        .fill_missing(
            &mut cache,
            iterate_dates(date("2024-01-01"), date("2024-01-04")),
        )
        .await;

    assert_eq!(report.added, [date("2024-01-01"), date("2024-01-02")]);
    assert_eq!(
        report
            .failed
            .iter()
            .map(|(day, _)| *day)
            .collect::<Vec<_>>(),
        [date("2024-01-03"), date("2024-01-04")]
    );
    assert_eq!(
        cache.missing(iterate_dates(date("2024-01-01"), date("2024-01-04"))),
        [date("2024-01-03"), date("2024-01-04")]
    );
}

#[tokio::test]
async fn dates_with_unordered_clocks_stay_missing() {
    let network = Network::new("ethereum");
    let mut stamps: Vec<i64> =
        (0..2_500).map(|n| GENESIS + 420 * n).collect();
    // The first block after New York midnight starting 2024-01-03 is
    // followed by one stamped before it.
    let (_, midnight) = Calendar::default().window(date("2024-01-02"));
    let answer = ((midnight - GENESIS) / 420) as usize;
    stamps[answer] = midnight + 300;
    stamps[answer + 1] = midnight + 200;
    let chain = Arc::new(MockChain::new().with_timestamps(stamps));
    let pool = mock_pool(&network, &chain);

    let mut cache = BlockCache::new(network.clone());
    let report = builder(&pool)
        .fill_missing(
            &mut cache,
            iterate_dates(date("2024-01-01"), date("2024-01-03")),
        )
        .await;

    assert_eq!(report.added, [date("2024-01-01"), date("2024-01-03")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, date("2024-01-02"));
    assert!(report.failed[0].1.contains("not monotonic"));
    assert!(cache.get(&date("2024-01-02")).is_none());
}
