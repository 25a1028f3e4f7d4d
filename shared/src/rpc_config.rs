use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::day::Calendar;
use crate::network::{Network, NetworkTable};
use crate::pool::{ConnectionPool, Credential};
use crate::retry::RetryPolicy;
use crate::utils::parse_duration;

fn parse_timezone(raw: &str) -> Result<Tz, String> {
    raw.parse::<Tz>().map_err(|e| e.to_string())
}

/// Endpoint, retry and calendar flags of every binary talking to networks.
#[derive(clap::Args, Clone, Debug)]
pub struct RpcConfig {
    #[clap(long, env, help = "Comma separated provider API keys")]
    pub rpc_keys: Option<String>,

    #[clap(long, env, help = "JSON file overriding built-in networks")]
    pub networks_file: Option<PathBuf>,

    #[clap(long, env, value_parser = parse_duration, default_value = "30s")]
    pub rpc_timeout: Duration,

    #[clap(long, env, value_parser = parse_duration, default_value = "1s")]
    pub backoff_base: Duration,

    #[clap(long, env, value_parser = parse_duration, default_value = "30s")]
    pub backoff_cap: Duration,

    #[clap(long, env, default_value_t = 5)]
    pub max_attempts: usize,

    #[clap(
        long,
        env,
        value_parser = parse_timezone,
        default_value = "America/New_York",
        help = "Timezone whose midnights delimit calendar days"
    )]
    pub timezone: Tz,
}

impl RpcConfig {
    pub fn table(&self) -> anyhow::Result<NetworkTable> {
        match &self.networks_file {
            Some(path) => NetworkTable::with_overrides(path),
            None => Ok(NetworkTable::default()),
        }
    }

    pub fn credentials(&self) -> Vec<Credential> {
        let credentials = self
            .rpc_keys
            .as_deref()
            .map(Credential::parse_list)
            .unwrap_or_default();
        if credentials.is_empty() {
            tracing::warn!("No RPC keys configured, using public endpoints");
        }
        credentials
    }

    pub fn pool(
        &self,
        table: &NetworkTable,
        networks: &[Network],
    ) -> anyhow::Result<ConnectionPool> {
        ConnectionPool::from_table(
            table,
            networks,
            &self.credentials(),
            self.rpc_timeout,
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base: self.backoff_base,
            cap: self.backoff_cap,
        }
    }

    pub fn calendar(&self) -> Calendar {
        Calendar::new(self.timezone)
    }
}
