use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use collector::deployments::discover;
use collector::entities::DeploymentOverrides;
use serde_json::json;
use shared::day::Calendar;
use shared::entity::EntityConfig;
use shared::id::Address;
use shared::network::{Network, NetworkTable};
use shared::retry::RetryPolicy;
use test_helpers::chain::{mock_pool, MockChain};

// 2023-12-31T00:00:00Z
const GENESIS: i64 = 1_703_980_800;
const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
const ROUTER: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";
const NOTHING: &str = "0x4200000000000000000000000000000000000006";

fn address(raw: &str) -> Address {
    raw.parse().unwrap()
}

fn entity(id: &str, targets: &[&str]) -> EntityConfig {
    serde_json::from_value(json!({
        "id": id,
        "network": "ethereum",
        "protocol": "event_logs",
        "targets": targets,
    }))
    .unwrap()
}

#[tokio::test]
async fn earliest_target_decides_the_date() {
    let network = Network::new("ethereum");
    // One block an hour for ten days, 2024-01-03 05:00 UTC is block 77.
    let chain = Arc::new(
        MockChain::new()
            .with_blocks(GENESIS, 3_600, 240)
            .deploy(&address(TOKEN), 150)
            .deploy(&address(ROUTER), 77),
    );
    let pool = mock_pool(&network, &chain);
    let policy = RetryPolicy {
        max_attempts: 2,
        base: Duration::from_millis(1),
        cap: Duration::from_millis(2),
    };

    let mut overrides = DeploymentOverrides::new();
    overrides.insert("kept".to_owned(), "2023-06-01".parse().unwrap());
    let failures = discover(
        &pool,
        &NetworkTable::default(),
        &Calendar::default(),
        &[
            entity("pair", &[TOKEN, ROUTER]),
            entity("ghost", &[NOTHING]),
        ],
        policy,
        &mut overrides,
    )
    .await;

    assert!(failures.is_empty());
    let expected: NaiveDate = "2024-01-03".parse().unwrap();
    assert_eq!(overrides.get("pair"), Some(&expected));
    assert!(!overrides.contains_key("ghost"));
    assert_eq!(
        overrides.get("kept"),
        Some(&"2023-06-01".parse::<NaiveDate>().unwrap())
    );
}
