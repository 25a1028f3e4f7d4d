use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::client::{HttpTransport, RpcTransport};
use crate::error::{classify, ErrorClass, PoolError, RpcError};
use crate::network::{ChainCompat, Network, NetworkTable};
use crate::rate_limiter::RateLimiter;

/// A provider API key. `name` is what gets logged, `secret` never is.
#[derive(Clone)]
pub struct Credential {
    pub name: String,
    pub secret: String,
}

impl Credential {
    /// Parses a comma separated key list, naming keys `key_1`, `key_2`, ...
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split(',')
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .enumerate()
            .map(|(index, secret)| Credential {
                name: format!("key_{}", index + 1),
                secret: secret.to_owned(),
            })
            .collect()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("name", &self.name).finish()
    }
}

/// One JSON-RPC endpoint bound to one credential on one network.
pub struct EndpointHandle {
    network: Network,
    label: String,
    keyed: bool,
    compat: ChainCompat,
    limiter: RateLimiter,
    transport: Arc<dyn RpcTransport>,
    blacklisted: AtomicBool,
}

impl EndpointHandle {
    pub fn new(
        network: Network,
        label: impl Into<String>,
        keyed: bool,
        compat: ChainCompat,
        min_interval: Duration,
        transport: Arc<dyn RpcTransport>,
    ) -> Self {
        Self {
            network,
            label: label.into(),
            keyed,
            compat,
            limiter: RateLimiter::new(min_interval),
            transport,
            blacklisted: AtomicBool::new(false),
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn compat(&self) -> ChainCompat {
        self.compat
    }

    pub fn min_interval(&self) -> Duration {
        self.limiter.min_interval()
    }

    pub fn is_blacklisted(&self) -> bool {
        self.blacklisted.load(Ordering::Relaxed)
    }

    /// Issues one request. The rate limiter has already been waited on by
    /// [`ConnectionPool::acquire`].
    pub async fn call(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let result = self.transport.request(method, params).await;

        if let Err(error) = &result {
            if self.keyed && classify(error) == ErrorClass::Unauthorized {
                self.blacklist(&error.to_string());
            }
        }

        result
    }

    fn blacklist(&self, reason: &str) {
        if !self.blacklisted.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                network = %self.network,
                endpoint = %self.label,
                reason,
                "Removing credential from rotation"
            );
        }
    }
}

struct NetworkEndpoints {
    handles: Vec<Arc<EndpointHandle>>,
    next: AtomicUsize,
}

/// Round-robin dispenser of rate-limited endpoint handles, per network.
pub struct ConnectionPool {
    networks: HashMap<Network, NetworkEndpoints>,
    aliases: HashMap<Network, Network>,
}

impl ConnectionPool {
    /// Builds one handle per credential for every network the keyed provider
    /// serves, falling back to the public endpoints otherwise.
    pub fn from_table(
        table: &NetworkTable,
        networks: &[Network],
        credentials: &[Credential],
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut handles = Vec::new();
        let networks: BTreeSet<Network> = networks
            .iter()
            .map(|network| table.canonical(network))
            .collect();

        for network in networks {
            let settings = table
                .settings(&network)
                .ok_or_else(|| PoolError::UnknownNetwork(network.clone()))?;

            let mut built = 0;
            if let Some(slug) = &settings.provider_slug {
                for credential in credentials {
                    let url = table.credential_url(slug, &credential.secret);
                    handles.push(EndpointHandle::new(
                        network.clone(),
                        credential.name.clone(),
                        true,
                        settings.compat,
                        table.credential_min_interval,
                        Arc::new(HttpTransport::new(&url, timeout)?),
                    ));
                    built += 1;
                }
            }

            if built == 0 {
                for url in &settings.public_endpoints {
                    handles.push(EndpointHandle::new(
                        network.clone(),
                        url.clone(),
                        false,
                        settings.compat,
                        table.public_min_interval,
                        Arc::new(HttpTransport::new(url, timeout)?),
                    ));
                    built += 1;
                }
            }

            if built == 0 {
                return Err(PoolError::NoEndpoints(network).into());
            }

            tracing::info!(
                network = %network,
                endpoints = built,
                keyed = settings.provider_slug.is_some()
                    && !credentials.is_empty(),
                "Built connection pool"
            );
        }

        let mut pool = Self::from_handles(handles)?;
        pool.aliases = table
            .aliases
            .iter()
            .map(|(alias, target)| (alias.clone(), target.clone()))
            .collect();

        Ok(pool)
    }

    pub fn from_handles(
        handles: Vec<EndpointHandle>,
    ) -> Result<Self, PoolError> {
        let mut networks: HashMap<Network, NetworkEndpoints> = HashMap::new();

        for handle in handles {
            networks
                .entry(handle.network.clone())
                .or_insert_with(|| NetworkEndpoints {
                    handles: Vec::new(),
                    next: AtomicUsize::new(0),
                })
                .handles
                .push(Arc::new(handle));
        }

        if networks.is_empty() {
            return Err(PoolError::NoEndpoints(Network::new("")));
        }

        Ok(Self {
            networks,
            aliases: HashMap::new(),
        })
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.keys()
    }

    pub fn handle_count(&self, network: &Network) -> usize {
        self.endpoints(network)
            .map(|endpoints| endpoints.handles.len())
            .unwrap_or_default()
    }

    fn endpoints(&self, network: &Network) -> Option<&NetworkEndpoints> {
        let network = self.aliases.get(network).unwrap_or(network);
        self.networks.get(network)
    }

    /// Next handle in round-robin order, once its rate limiter permits a
    /// call. Blacklisted handles are skipped.
    pub async fn acquire(
        &self,
        network: &Network,
    ) -> Result<Arc<EndpointHandle>, PoolError> {
        let endpoints = self
            .endpoints(network)
            .ok_or_else(|| PoolError::UnknownNetwork(network.clone()))?;
        let count = endpoints.handles.len();

        for _ in 0..count {
            let index = endpoints.next.fetch_add(1, Ordering::Relaxed) % count;
            let handle = &endpoints.handles[index];
            if handle.is_blacklisted() {
                continue;
            }

            handle.limiter.acquire().await;
            return Ok(Arc::clone(handle));
        }

        Err(PoolError::Exhausted(network.clone()))
    }
}
