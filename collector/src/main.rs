use std::collections::BTreeSet;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use collector::adapters;
use collector::checkpoint::{Checkpoint, CheckpointBuffer, DateRange};
use collector::config::{AppConfig, Command, ExecArgs};
use collector::deployments;
use collector::entities::{load_overrides, save_overrides, EntityRegistry};
use collector::orchestrator::Orchestrator;
use collector::output::OutputWriter;
use collector::shutdown::must_exit_handle;
use collector::snapshots::Snapshots;
use collector::task::plan;
use collector::valuation::Valuation;
use pricing::cache::PriceCache;
use pricing::store::PriceStore;
use shared::adapter::{AdapterRegistry, DecimalsMemo};
use shared::block_cache::CacheBuilder;
use shared::entity::EntityConfig;
use shared::error::{AsConfigError, AsRpcError, AsStorageError, MainError};
use shared::network::{Network, NetworkTable};
use shared::retry::RetryPolicy;

fn networks_of(
    table: &NetworkTable,
    entities: &[EntityConfig],
) -> Vec<Network> {
    entities
        .iter()
        .map(|entity| table.canonical(&entity.network))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn check_protocols(
    adapters: &AdapterRegistry,
    entities: &[EntityConfig],
) -> anyhow::Result<()> {
    for entity in entities {
        let adapter = adapters.get(&entity.protocol)?;
        adapter.resolve_targets(entity)?;
    }
    Ok(())
}

struct Selection {
    checkpoint: Checkpoint,
    range: DateRange,
    entities: Vec<EntityConfig>,
    force: bool,
}

/// Entities and dates of a fresh run, recorded in the checkpoint so a later
/// `resume` picks the same ones.
fn select_run(
    exec: &ExecArgs,
    registry: &EntityRegistry,
    range: DateRange,
    only: &[String],
    force: bool,
) -> anyhow::Result<Selection> {
    if range.start > range.end {
        bail!("start {} is after end {}", range.start, range.end);
    }
    let entities = registry.select(only)?;

    let mut checkpoint = Checkpoint::load(&exec.checkpoint)?;
    checkpoint.date_range = Some(range);
    checkpoint.entities =
        entities.iter().map(|entity| entity.id.clone()).collect();

    Ok(Selection {
        checkpoint,
        range,
        entities,
        force,
    })
}

fn select_resume(
    exec: &ExecArgs,
    registry: &EntityRegistry,
) -> anyhow::Result<Selection> {
    let checkpoint = Checkpoint::load(&exec.checkpoint)?;
    let range = checkpoint.date_range.with_context(|| {
        format!(
            "Checkpoint {} records no run to resume",
            exec.checkpoint.display()
        )
    })?;
    let entities = registry.select(&checkpoint.entities)?;
    tracing::info!(
        completed = checkpoint.completed.len(),
        failed = checkpoint.failed.len(),
        start = %range.start,
        end = %range.end,
        "Resuming run"
    );

    Ok(Selection {
        checkpoint,
        range,
        entities,
        force: false,
    })
}

async fn collect(
    config: &AppConfig,
    table: &NetworkTable,
    exec: &ExecArgs,
    registry: &EntityRegistry,
    selection: Selection,
) -> Result<(), MainError> {
    let adapters = adapters::registry();
    check_protocols(&adapters, &selection.entities).into_config_error()?;

    let networks = networks_of(table, &selection.entities);
    let pool = config.rpc.pool(table, &networks).into_config_error()?;

    let policy = config.rpc.retry_policy();
    let mut builder = CacheBuilder::new(&pool, config.rpc.calendar());
    builder.call_policy = policy;

    let snapshots = Snapshots::load(builder, &config.cache_dir, networks)
        .map_err(anyhow::Error::from)
        .into_storage_error()?;

    let plan = plan(
        &selection.entities,
        selection.range.start,
        selection.range.end,
        &selection.checkpoint.completed,
        selection.force,
    );

    let checkpoint = CheckpointBuffer::new(
        exec.checkpoint.clone(),
        selection.checkpoint,
        exec.flush_every,
    );
    checkpoint.flush().into_storage_error()?;

    let valuation = exec.price_cache_dir.as_ref().map(|dir| {
        Valuation::new(PriceCache::new(
            PriceStore::new(dir.clone(), exec.price_requests_dir.clone()),
            exec.tiers(),
        ))
    });

    let writer = OutputWriter::new(exec.out_dir.clone());
    let orchestrator = Orchestrator {
        pool: &pool,
        table,
        adapters: &adapters,
        entities: registry,
        snapshots: &snapshots,
        checkpoint: &checkpoint,
        writer: &writer,
        valuation: valuation.as_ref(),
        call_policy: policy,
        task_policy: RetryPolicy {
            max_attempts: 2,
            ..policy
        },
        workers: exec.workers,
        must_exit: must_exit_handle(),
        decimals: DecimalsMemo::default(),
    };

    let result = orchestrator.run(plan).await;

    for path in snapshots
        .persist()
        .map_err(anyhow::Error::from)
        .into_storage_error()?
    {
        tracing::info!(path = %path.display(), "Saved block cache");
    }
    if let Some(valuation) = &valuation {
        valuation.flush().into_storage_error()?;
    }

    let summary = result.into_storage_error()?;
    summary.print();

    Ok(())
}

async fn discover_deployments(
    config: &AppConfig,
    table: &NetworkTable,
    registry: &EntityRegistry,
    only: &[String],
    path: &std::path::Path,
) -> Result<(), MainError> {
    let entities = registry.select(only).into_config_error()?;
    let pool = config
        .rpc
        .pool(table, &networks_of(table, &entities))
        .into_config_error()?;

    let mut overrides = load_overrides(path).into_config_error()?;
    let failures = deployments::discover(
        &pool,
        table,
        &config.rpc.calendar(),
        &entities,
        config.rpc.retry_policy(),
        &mut overrides,
    )
    .await;
    save_overrides(path, &overrides).into_storage_error()?;

    for entity in &entities {
        match overrides.get(&entity.id) {
            Some(date) => println!("{}: {date}", entity.id),
            None => println!("{}: unknown", entity.id),
        }
    }

    if let Some((entity, error)) = failures.first() {
        return Err::<(), _>(anyhow!(
            "{} deployment search(es) failed, first {entity}: {error}",
            failures.len()
        ))
        .into_rpc_error();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let config = AppConfig::parse();

    config.log.init();

    let table = config.rpc.table().into_config_error()?;

    match &config.command {
        Command::Run {
            exec,
            start,
            end,
            only,
            force,
        } => {
            let registry = EntityRegistry::load(
                &exec.entities,
                Some(exec.deployments.as_path()),
            )
            .into_config_error()?;
            let range = DateRange {
                start: *start,
                end: *end,
            };
            let selection = select_run(exec, &registry, range, only, *force)
                .into_config_error()?;

            collect(&config, &table, exec, &registry, selection)
                .await
        }
        Command::Resume { exec } => {
            let registry = EntityRegistry::load(
                &exec.entities,
                Some(exec.deployments.as_path()),
            )
            .into_config_error()?;
            let selection =
                select_resume(exec, &registry).into_config_error()?;

            collect(&config, &table, exec, &registry, selection)
                .await
        }
        Command::Deployments {
            entities,
            deployments,
            only,
        } => {
            let registry =
                EntityRegistry::load(entities, None).into_config_error()?;

            discover_deployments(
                &config,
                &table,
                &registry,
                only,
                deployments,
            )
            .await
        }
    }
}
