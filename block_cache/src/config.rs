use std::path::PathBuf;

use chrono::NaiveDate;
use shared::log_config::LogConfig;
use shared::network::Network;
use shared::rpc_config::RpcConfig;

#[derive(clap::Parser)]
pub struct AppConfig {
    #[clap(long, env, default_value = "data/blocks")]
    pub cache_dir: PathBuf,

    #[clap(
        long,
        env,
        default_value_t = 4,
        help = "Dates resolved at the same time"
    )]
    pub concurrency: usize,

    #[command(flatten)]
    pub rpc: RpcConfig,

    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub log: LogConfig,
}

#[derive(clap::Args, Clone, Debug)]
pub struct RangeArgs {
    #[clap(long)]
    pub network: Network,

    #[clap(long)]
    pub start: NaiveDate,

    #[clap(long)]
    pub end: NaiveDate,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Resolve every date of the range into a new cache file, resuming the
    /// file of the same range when a previous build was cut short.
    Build {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Fill the dates of the range missing from every cache file of the
    /// network and write the result as the cache of the range.
    Repair {
        #[command(flatten)]
        range: RangeArgs,
    },
}
