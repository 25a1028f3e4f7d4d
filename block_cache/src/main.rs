use anyhow::anyhow;
use block_cache::config::{AppConfig, Command};
use block_cache::runner;
use clap::Parser;
use shared::block_cache::CacheBuilder;
use shared::error::{AsConfigError, AsRpcError, AsStorageError, MainError};

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let config = AppConfig::parse();

    config.log.init();

    let (Command::Build { range } | Command::Repair { range }) =
        &config.command;
    if range.start > range.end {
        return Err::<(), _>(anyhow!(
            "start {} is after end {}",
            range.start,
            range.end
        ))
        .into_config_error();
    }

    let table = config.rpc.table().into_config_error()?;
    let network = table.canonical(&range.network);
    let pool = config
        .rpc
        .pool(&table, std::slice::from_ref(&network))
        .into_config_error()?;

    let builder = CacheBuilder {
        call_policy: config.rpc.retry_policy(),
        concurrency: config.concurrency,
        ..CacheBuilder::new(&pool, config.rpc.calendar())
    };

    let written = match &config.command {
        Command::Build { .. } => {
            runner::build(
                &builder,
                &config.cache_dir,
                &network,
                range.start,
                range.end,
            )
            .await
        }
        Command::Repair { .. } => {
            runner::repair(
                &builder,
                &config.cache_dir,
                &network,
                range.start,
                range.end,
            )
            .await
        }
    }
    .map_err(anyhow::Error::from)
    .into_storage_error()?;

    println!(
        "{}: {} dates, {} added, {} failed",
        written.path.display(),
        written.cache.len(),
        written.report.added.len(),
        written.report.failed.len()
    );
    for (date, error) in &written.report.failed {
        println!("  {date}: {error}");
    }

    if !written.report.failed.is_empty() {
        return Err::<(), _>(anyhow!(
            "{} date(s) could not be resolved, run repair again",
            written.report.failed.len()
        ))
        .into_rpc_error();
    }

    Ok(())
}
