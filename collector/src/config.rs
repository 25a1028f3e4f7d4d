use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use pricing::series::ToleranceTiers;
use shared::log_config::LogConfig;
use shared::rpc_config::RpcConfig;
use shared::utils::parse_duration;

#[derive(clap::Parser)]
pub struct AppConfig {
    #[clap(long, env, default_value = "data/blocks")]
    pub cache_dir: PathBuf,

    #[command(flatten)]
    pub rpc: RpcConfig,

    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub log: LogConfig,
}

#[derive(clap::Args, Clone)]
pub struct ExecArgs {
    #[clap(long, env, default_value = "config/entities.json")]
    pub entities: PathBuf,

    #[clap(long, env, default_value = "config/deployments.json")]
    pub deployments: PathBuf,

    #[clap(long, env, default_value_t = 4)]
    pub workers: usize,

    #[clap(long, env, default_value = "data/checkpoint.json")]
    pub checkpoint: PathBuf,

    #[clap(long, env, default_value = "data/output")]
    pub out_dir: PathBuf,

    #[clap(
        long,
        env,
        default_value_t = 10,
        help = "Checkpoint writes happen every this many task updates"
    )]
    pub flush_every: usize,

    #[clap(long, env, help = "Enables valuation from this price cache")]
    pub price_cache_dir: Option<PathBuf>,

    #[clap(long, env, default_value = "data/pricing/requests")]
    pub price_requests_dir: PathBuf,

    #[clap(
        long,
        env,
        value_delimiter = ',',
        value_parser = parse_duration,
        default_value = "1h,3h,34h"
    )]
    pub tolerance: Vec<Duration>,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Collect every (entity, date) task of a date range.
    Run {
        #[command(flatten)]
        exec: ExecArgs,

        #[clap(long)]
        start: NaiveDate,

        #[clap(long)]
        end: NaiveDate,

        #[clap(long, value_delimiter = ',', help = "Entity ids to collect")]
        only: Vec<String>,

        #[clap(long, help = "Re-run tasks the checkpoint marks completed")]
        force: bool,
    },
    /// Continue the run recorded in the checkpoint.
    Resume {
        #[command(flatten)]
        exec: ExecArgs,
    },
    /// Search deployment dates and merge them into the overrides file.
    Deployments {
        #[clap(long, env, default_value = "config/entities.json")]
        entities: PathBuf,

        #[clap(long, env, default_value = "config/deployments.json")]
        deployments: PathBuf,

        #[clap(long, value_delimiter = ',')]
        only: Vec<String>,
    },
}

impl ExecArgs {
    pub fn tiers(&self) -> ToleranceTiers {
        ToleranceTiers::new(
            self.tolerance.iter().map(|tolerance| tolerance.as_secs() as i64),
        )
    }
}
