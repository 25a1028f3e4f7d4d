use chrono::NaiveDate;
use shared::day::Calendar;
use shared::entity::EntityConfig;
use shared::error::CallError;
use shared::eth;
use shared::network::NetworkTable;
use shared::pool::ConnectionPool;
use shared::resolver::find_deployment_block;
use shared::retry::RetryPolicy;

use crate::entities::DeploymentOverrides;

/// Calendar date on which the first of `entity`'s targets got its code,
/// `None` when no target has code at the head.
pub async fn deployment_date(
    pool: &ConnectionPool,
    table: &NetworkTable,
    calendar: &Calendar,
    entity: &EntityConfig,
    policy: RetryPolicy,
) -> Result<Option<NaiveDate>, CallError> {
    let network = table.canonical(&entity.network);

    let mut first = None;
    for target in &entity.targets {
        let block =
            find_deployment_block(pool, &network, target, policy).await?;
        tracing::debug!(
            entity = %entity.id,
            %target,
            ?block,
            "Searched deployment block"
        );
        first = match (first, block) {
            (Some(known), Some(block)) => Some(block.min(known)),
            (known, block) => known.or(block),
        };
    }

    let Some(block) = first else {
        return Ok(None);
    };
    let header = policy
        .run("eth_getBlockByNumber", || {
            eth::block_header(pool, &network, block)
        })
        .await?;

    Ok(calendar.date_of(header.timestamp))
}

/// Discovers the deployment date of every entity in `entities` and merges
/// the results into `overrides`. Entities that could not be searched are
/// returned with their error.
pub async fn discover(
    pool: &ConnectionPool,
    table: &NetworkTable,
    calendar: &Calendar,
    entities: &[EntityConfig],
    policy: RetryPolicy,
    overrides: &mut DeploymentOverrides,
) -> Vec<(String, CallError)> {
    let mut failures = Vec::new();

    for entity in entities {
        match deployment_date(pool, table, calendar, entity, policy).await {
            Ok(Some(date)) => {
                tracing::info!(entity = %entity.id, %date, "Found deployment");
                overrides.insert(entity.id.clone(), date);
            }
            Ok(None) => {
                tracing::warn!(entity = %entity.id, "Targets have no code")
            }
            Err(error) => {
                tracing::warn!(
                    entity = %entity.id,
                    %error,
                    "Deployment search failed"
                );
                failures.push((entity.id.clone(), error));
            }
        }
    }

    failures
}
