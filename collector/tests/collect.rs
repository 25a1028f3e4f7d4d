use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use collector::adapters;
use collector::checkpoint::{Checkpoint, CheckpointBuffer};
use collector::entities::EntityRegistry;
use collector::orchestrator::{Orchestrator, Summary};
use collector::output::{OutputWriter, TaskOutput};
use collector::snapshots::Snapshots;
use collector::task::{plan, TaskId};
use collector::valuation::Valuation;
use pricing::cache::PriceCache;
use pricing::series::{PricePoint, PriceSeries, ToleranceTiers};
use pricing::store::PriceStore;
use serde_json::json;
use shared::adapter::DecimalsMemo;
use shared::block_cache::CacheBuilder;
use shared::day::Calendar;
use shared::entity::EntityConfig;
use shared::id::Address;
use shared::network::{Network, NetworkTable};
use shared::retry::RetryPolicy;
use test_helpers::chain::{mock_pool, MockChain};

// 2023-12-31T00:00:00Z
const GENESIS: i64 = 1_703_980_800;
const BLOCK_TIME: i64 = 1_800;
const BLOCKS: u64 = 3_300;
const TRANSFER: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
const VAULT: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";
const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

fn date(raw: &str) -> NaiveDate {
    raw.parse().unwrap()
}

fn address(raw: &str) -> Address {
    raw.parse().unwrap()
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base: Duration::from_millis(1),
        cap: Duration::from_millis(4),
    }
}

/// Block closest to New York noon of `day`.
fn noon_block(day: &str) -> u64 {
    let (start, end) = Calendar::default().window(date(day));
    ((start + end) / 2 - GENESIS) as u64 / BLOCK_TIME as u64
}

fn vault_chain() -> MockChain {
    let mut chain = MockChain::new()
        .with_blocks(GENESIS, BLOCK_TIME, BLOCKS)
        .add_log(&address(VAULT), TRANSFER, noon_block("2024-01-10"), "0x00");
    for day in 1..=5 {
        chain = chain.add_log(
            &address(VAULT),
            TRANSFER,
            noon_block(&format!("2024-03-0{day}")),
            &format!("0x{day:02x}"),
        );
    }
    chain
}

fn vault_entity() -> EntityConfig {
    serde_json::from_value(json!({
        "id": "A",
        "network": "ethereum",
        "protocol": "event_logs",
        "targets": [VAULT],
        "topics": [TRANSFER],
        "deployment_date": "2024-03-01",
    }))
    .unwrap()
}

struct Run<'a> {
    dir: &'a Path,
    chain: Arc<MockChain>,
    registry: EntityRegistry,
    valuation: Option<Valuation>,
    interrupted: bool,
}

impl Run<'_> {
    fn checkpoint_path(&self) -> std::path::PathBuf {
        self.dir.join("checkpoint.json")
    }

    fn writer(&self) -> OutputWriter {
        OutputWriter::new(self.dir.join("out"))
    }

    /// Plans `start..=end` against the checkpoint on disk and runs at most
    /// `limit` of the planned tasks.
    async fn execute(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        limit: Option<usize>,
    ) -> Summary {
        let network = Network::new("ethereum");
        let pool = mock_pool(&network, &self.chain);
        let table = NetworkTable::default();
        let adapters = adapters::registry();
        let builder = CacheBuilder {
            call_policy: policy(),
            date_policy: policy(),
            ..CacheBuilder::new(&pool, Calendar::default())
        };
        let snapshots =
            Snapshots::load(builder, &self.dir.join("blocks"), [network])
                .unwrap();

        let checkpoint = Checkpoint::load(&self.checkpoint_path()).unwrap();
        let mut plan = plan(
            self.registry.all(),
            start,
            end,
            &checkpoint.completed,
            false,
        );
        if let Some(limit) = limit {
            plan.tasks.truncate(limit);
        }
        let buffer =
            CheckpointBuffer::new(self.checkpoint_path(), checkpoint, 2);
        let writer = self.writer();

        let summary = Orchestrator {
            pool: &pool,
            table: &table,
            adapters: &adapters,
            entities: &self.registry,
            snapshots: &snapshots,
            checkpoint: &buffer,
            writer: &writer,
            valuation: self.valuation.as_ref(),
            call_policy: policy(),
            task_policy: policy(),
            workers: 3,
            must_exit: Arc::new(AtomicBool::new(self.interrupted)),
            decimals: DecimalsMemo::default(),
        }
        .run(plan)
        .await
        .unwrap();

        snapshots.persist().unwrap();
        summary
    }

    fn output(&self, day: &str) -> TaskOutput {
        let entity = &self.registry.all()[0];
        let path = self.writer().path(entity, date(day));
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }
}

fn vault_run(dir: &Path) -> Run<'_> {
    Run {
        dir,
        chain: Arc::new(vault_chain()),
        registry: EntityRegistry::new(vec![vault_entity()]).unwrap(),
        valuation: None,
        interrupted: false,
    }
}

#[tokio::test]
async fn only_days_after_deployment_are_collected() {
    let dir = tempfile::tempdir().unwrap();
    let run = vault_run(dir.path());

    let summary = run
        .execute(date("2024-01-01"), date("2024-03-05"), None)
        .await;

    assert_eq!(summary.completed, 5);
    assert_eq!(summary.before_deployment, 60);
    assert!(summary.failed.is_empty());

    let checkpoint = Checkpoint::load(&run.checkpoint_path()).unwrap();
    let expected: BTreeSet<TaskId> = (1..=5)
        .map(|day| TaskId::new("A", date(&format!("2024-03-0{day}"))))
        .collect();
    assert_eq!(checkpoint.completed, expected);

    for day in 1..=5 {
        let output = run.output(&format!("2024-03-0{day}"));
        let (_, midnight) = Calendar::default().window(output.date);

        assert_eq!(output.records.len(), 1, "{}", output.date);
        assert!(output.timestamp < midnight);
        assert!(
            run.chain.timestamp_of(output.block + 1).unwrap() >= midnight
        );

        let row = &output.records[0];
        assert_eq!(row["event"], TRANSFER);
        assert_eq!(row["data"], format!("0x{day:02x}"));
        assert_eq!(row["timestamp"], output.timestamp);
    }
    let early = run.writer().path(&vault_entity(), date("2024-01-10"));
    assert!(!early.exists());
}

#[tokio::test]
async fn resuming_matches_an_uninterrupted_run() {
    let full_dir = tempfile::tempdir().unwrap();
    let full = vault_run(full_dir.path());
    full.execute(date("2024-02-25"), date("2024-03-05"), None).await;

    let split_dir = tempfile::tempdir().unwrap();
    let split = vault_run(split_dir.path());
    let first = split
        .execute(date("2024-02-25"), date("2024-03-05"), Some(2))
        .await;
    assert_eq!(first.completed, 2);

    let second = split
        .execute(date("2024-02-25"), date("2024-03-05"), None)
        .await;
    assert_eq!(second.completed, 3);
    assert_eq!(second.already_complete, 2);

    let full_checkpoint = Checkpoint::load(&full.checkpoint_path()).unwrap();
    let split_checkpoint = Checkpoint::load(&split.checkpoint_path()).unwrap();
    assert_eq!(full_checkpoint.completed, split_checkpoint.completed);

    for day in 1..=5 {
        let day = format!("2024-03-0{day}");
        assert_eq!(full.output(&day), split.output(&day));
    }

    // Nothing is left, a third pass does no work.
    split.chain.reset_counts();
    let third = split
        .execute(date("2024-02-25"), date("2024-03-05"), None)
        .await;
    assert_eq!(third.completed, 0);
    assert_eq!(third.already_complete, 5);
    assert_eq!(split.chain.requests(), 0);
}

#[tokio::test]
async fn interrupted_runs_start_no_task() {
    let dir = tempfile::tempdir().unwrap();
    let run = Run {
        interrupted: true,
        ..vault_run(dir.path())
    };

    let summary = run
        .execute(date("2024-03-01"), date("2024-03-05"), None)
        .await;

    assert_eq!(summary.completed, 0);
    assert_eq!(summary.interrupted, 5);
    let checkpoint = Checkpoint::load(&run.checkpoint_path()).unwrap();
    assert!(checkpoint.completed.is_empty());
}

#[tokio::test]
async fn supplies_are_read_at_the_snapshot_and_valued() {
    let dir = tempfile::tempdir().unwrap();
    let supply = 25_000_000_000_000u128;
    let chain = MockChain::new()
        .with_blocks(GENESIS, BLOCK_TIME, BLOCKS)
        .deploy(&address(USDC), 10)
        .on_call(&address(USDC), "0x18160ddd", &format!("0x{supply:064x}"))
        .on_call(&address(USDC), "0x313ce567", &format!("0x{:064x}", 6));

    let network = Network::new("ethereum");
    let store =
        PriceStore::new(dir.path().join("prices"), dir.path().join("req"));
    let points = (0..BLOCKS as i64)
        .map(|n| PricePoint {
            timestamp: GENESIS + n * BLOCK_TIME,
            price_usd: 1.0,
        })
        .collect();
    store
        .save_series(
            &network,
            &address(USDC),
            &PriceSeries::from_points(points),
        )
        .unwrap();

    let entity: EntityConfig = serde_json::from_value(json!({
        "id": "usdc-supply",
        "network": "ethereum",
        "protocol": "erc20_supply",
        "targets": [USDC],
    }))
    .unwrap();
    let run = Run {
        dir: dir.path(),
        chain: Arc::new(chain),
        registry: EntityRegistry::new(vec![entity]).unwrap(),
        valuation: Some(Valuation::new(PriceCache::new(
            store,
            ToleranceTiers::default(),
        ))),
        interrupted: false,
    };

    let summary = run
        .execute(date("2024-01-02"), date("2024-01-03"), None)
        .await;
    assert_eq!(summary.completed, 2);

    let output = run.output("2024-01-02");
    let row = &output.records[0];
    assert_eq!(row["block"], output.block);
    assert_eq!(row["total_supply"], 25_000_000.0);
    assert_eq!(row["price_usd"], 1.0);
    assert_eq!(row["transaction_hash"], serde_json::Value::Null);
}

fn supply_entity(id: &str) -> EntityConfig {
    serde_json::from_value(json!({
        "id": id,
        "network": "ethereum",
        "protocol": "erc20_supply",
        "targets": [USDC],
    }))
    .unwrap()
}

#[tokio::test]
async fn failed_tasks_are_recorded_and_retried_next_pass() {
    let dir = tempfile::tempdir().unwrap();
    let vault = EntityConfig {
        deployment_date: None,
        ..vault_entity()
    };
    // The token has code but answers no call.
    let reverting = vault_chain().deploy(&address(USDC), 10);
    let run = Run {
        dir: dir.path(),
        chain: Arc::new(reverting),
        registry: EntityRegistry::new(vec![vault, supply_entity("broken")])
            .unwrap(),
        valuation: None,
        interrupted: false,
    };

    let summary = run
        .execute(date("2024-01-02"), date("2024-01-03"), None)
        .await;

    assert_eq!(summary.completed, 2);
    let reverted = "JSON-RPC error 3: execution reverted".to_owned();
    assert_eq!(
        summary.failed,
        [
            (TaskId::new("broken", date("2024-01-02")), reverted.clone()),
            (TaskId::new("broken", date("2024-01-03")), reverted.clone()),
        ]
    );

    let checkpoint = Checkpoint::load(&run.checkpoint_path()).unwrap();
    assert!(checkpoint
        .completed
        .iter()
        .all(|task| task.to_string().starts_with("A:")));
    let mut failed: Vec<_> = checkpoint
        .failed
        .iter()
        .map(|failed| (failed.task.to_string(), failed.error.clone()))
        .collect();
    failed.sort();
    assert_eq!(
        failed,
        [
            ("broken:2024-01-02".to_owned(), reverted.clone()),
            ("broken:2024-01-03".to_owned(), reverted),
        ]
    );

    // Once the token answers, the next pass runs only the failed tasks.
    let healthy = vault_chain()
        .deploy(&address(USDC), 10)
        .on_call(&address(USDC), "0x18160ddd", &format!("0x{:064x}", 1_000))
        .on_call(&address(USDC), "0x313ce567", &format!("0x{:064x}", 0));
    let retry = Run {
        chain: Arc::new(healthy),
        ..run
    };
    let second = retry
        .execute(date("2024-01-02"), date("2024-01-03"), None)
        .await;

    assert_eq!(second.already_complete, 2);
    assert_eq!(second.completed, 2);
    assert!(second.failed.is_empty());
    let checkpoint = Checkpoint::load(&retry.checkpoint_path()).unwrap();
    assert_eq!(checkpoint.completed.len(), 4);
    assert!(checkpoint.failed.is_empty());
}
