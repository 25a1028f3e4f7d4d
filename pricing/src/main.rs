use anyhow::Context;
use clap::Parser;
use pricing::backfill::{AssetOutcome, Backfill};
use pricing::cache::PriceCache;
use pricing::config::{AppConfig, Command};
use pricing::registry::AssetRegistry;
use pricing::source::{ApiKey, CoinGecko};
use pricing::store::PriceStore;
use shared::error::{AsConfigError, AsRpcError, AsStorageError, MainError};

#[tokio::main]
async fn main() -> Result<(), MainError> {
    let config = AppConfig::parse();

    config.log.init();

    let tiers = config.tiers();
    let store =
        PriceStore::new(config.cache_dir.clone(), config.requests_dir.clone());

    match config.command {
        Command::Backfill {
            coingecko_pro_api_key,
            coingecko_demo_api_key,
            min_interval,
            coingecko_base_url,
        } => {
            let key = ApiKey::from_options(
                coingecko_pro_api_key,
                coingecko_demo_api_key,
            );
            let mut source = CoinGecko::new(key, min_interval)
                .context("Failed to build price source client")
                .into_config_error()?;
            if let Some(base_url) = coingecko_base_url {
                source = source.with_base_url(base_url);
            }

            let mut registry = AssetRegistry::load(&config.asset_registry)
                .into_config_error()?;
            tracing::info!(assets = registry.len(), "Loaded asset registry");

            let report = Backfill {
                store: &store,
                registry: &mut registry,
                source: &source,
                tiers: &tiers,
            }
            .run()
            .await
            .into_rpc_error()?;

            for (network, asset, outcome) in &report.assets {
                match outcome {
                    AssetOutcome::Complete { satisfied } => {
                        println!("{network} {asset}: {satisfied} satisfied")
                    }
                    AssetOutcome::Partial {
                        satisfied,
                        remaining,
                    } => println!(
                        "{network} {asset}: {satisfied} satisfied, \
                         {remaining} remaining"
                    ),
                    AssetOutcome::Skipped { reason } => {
                        println!("{network} {asset}: skipped ({reason})")
                    }
                }
            }
            println!(
                "assets: {}, points fetched: {}, remaining: {}, skipped: {}",
                report.assets.len(),
                report.fetched_points,
                report.remaining(),
                report.skipped()
            );
        }
        Command::Lookup { network, asset, at } => {
            let cache = PriceCache::new(store, tiers);
            match cache.lookup(&network, &asset, at) {
                Some(price) => println!("{price}"),
                None => {
                    let queued =
                        cache.flush_requests().into_storage_error()?;
                    println!("no price yet, {queued} request(s) queued");
                }
            }
        }
    }

    Ok(())
}
