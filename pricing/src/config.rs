use std::path::PathBuf;
use std::time::Duration;

use shared::id::Address;
use shared::log_config::LogConfig;
use shared::network::Network;
use shared::utils::parse_duration;

use crate::series::ToleranceTiers;

#[derive(clap::Parser)]
pub struct AppConfig {
    #[clap(long, env, default_value = "data/pricing")]
    pub cache_dir: PathBuf,

    #[clap(long, env, default_value = "data/pricing/requests")]
    pub requests_dir: PathBuf,

    #[clap(long, env, default_value = "data/pricing/assets.json")]
    pub asset_registry: PathBuf,

    #[clap(
        long,
        env,
        value_delimiter = ',',
        value_parser = parse_duration,
        default_value = "1h,3h,34h",
        help = "As-of tolerance tiers, tried in order"
    )]
    pub tolerance: Vec<Duration>,

    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub log: LogConfig,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Fetch prices for every pending request file.
    Backfill {
        #[clap(long, env)]
        coingecko_pro_api_key: Option<String>,

        #[clap(long, env)]
        coingecko_demo_api_key: Option<String>,

        #[clap(
            long,
            env = "PRICE_MIN_INTERVAL",
            value_parser = parse_duration,
            help = "Minimum spacing between price source calls"
        )]
        min_interval: Option<Duration>,

        #[clap(long, env)]
        coingecko_base_url: Option<String>,
    },
    /// Look up a single cached price.
    Lookup {
        #[clap(long)]
        network: Network,

        #[clap(long)]
        asset: Address,

        #[clap(long, help = "Unix timestamp in seconds")]
        at: i64,
    },
}

impl AppConfig {
    pub fn tiers(&self) -> ToleranceTiers {
        ToleranceTiers::new(
            self.tolerance
                .iter()
                .map(|tolerance| tolerance.as_secs() as i64),
        )
    }
}
