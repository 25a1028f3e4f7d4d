use std::collections::HashMap;

use thiserror::Error;

use crate::block::{BlockNumber, Timestamp};
use crate::error::{CallError, ErrorClass};
use crate::eth;
use crate::id::Address;
use crate::network::Network;
use crate::pool::ConnectionPool;
use crate::retry::{Classified, RetryPolicy};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("timestamp {target} is past the head block {head} ({head_timestamp})")]
    AfterHead {
        target: Timestamp,
        head: BlockNumber,
        head_timestamp: Timestamp,
    },
    #[error("block timestamps are not monotonic around block {block}")]
    NotMonotonic { block: BlockNumber },
}

impl Classified for ResolveError {
    fn class(&self) -> ErrorClass {
        match self {
            ResolveError::Call(error) => error.class(),
            // A reorganisation may have been observed mid search.
            ResolveError::NotMonotonic { .. } => ErrorClass::Transient,
            ResolveError::AfterHead { .. } => ErrorClass::Terminal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBlock {
    pub number: BlockNumber,
    pub timestamp: Timestamp,
}

/// Memoises block timestamps for the duration of one search.
struct Probe<'a> {
    pool: &'a ConnectionPool,
    network: &'a Network,
    policy: RetryPolicy,
    seen: HashMap<BlockNumber, Timestamp>,
}

impl Probe<'_> {
    async fn fetch(
        &self,
        number: BlockNumber,
    ) -> Result<Timestamp, CallError> {
        let (pool, network) = (self.pool, self.network);
        let header = self
            .policy
            .run("eth_getBlockByNumber", || {
                eth::block_header(pool, network, number)
            })
            .await?;

        Ok(header.timestamp)
    }

    async fn timestamp(
        &mut self,
        number: BlockNumber,
    ) -> Result<Timestamp, CallError> {
        if let Some(timestamp) = self.seen.get(&number) {
            return Ok(*timestamp);
        }

        let timestamp = self.fetch(number).await?;
        self.seen.insert(number, timestamp);

        Ok(timestamp)
    }
}

/// Lowest block whose timestamp is at or after `target`.
///
/// Block timestamps are assumed to be non decreasing. The answer and its
/// neighbours are read again once the search ends, and the answer is
/// rejected when the assumption does not hold around it.
pub async fn block_for_timestamp(
    pool: &ConnectionPool,
    network: &Network,
    target: Timestamp,
    policy: RetryPolicy,
) -> Result<ResolvedBlock, ResolveError> {
    let head = policy
        .run("eth_blockNumber", || eth::latest_block(pool, network))
        .await?;

    let mut probe = Probe {
        pool,
        network,
        policy,
        seen: HashMap::new(),
    };

    let head_timestamp = probe.timestamp(head).await?;
    if head_timestamp < target {
        return Err(ResolveError::AfterHead {
            target,
            head,
            head_timestamp,
        });
    }

    let (mut low, mut high) = (1, head);
    while low < high {
        let mid = low + (high - low) / 2;
        if probe.timestamp(mid).await? >= target {
            high = mid;
        } else {
            low = mid + 1;
        }
    }

    // Fresh reads, bypassing the memo.
    let timestamp = probe.fetch(low).await?;
    let consistent = timestamp >= target
        && (low == 1 || probe.fetch(low - 1).await? < target)
        && (low == head || probe.fetch(low + 1).await? >= timestamp);
    if !consistent {
        return Err(ResolveError::NotMonotonic { block: low });
    }

    tracing::debug!(
        network = %network,
        target,
        block = low,
        probes = probe.seen.len(),
        "Resolved timestamp"
    );

    Ok(ResolvedBlock {
        number: low,
        timestamp,
    })
}

/// First block at which `address` has code, `None` when it has none at the
/// head either.
pub async fn find_deployment_block(
    pool: &ConnectionPool,
    network: &Network,
    address: &Address,
    policy: RetryPolicy,
) -> Result<Option<BlockNumber>, CallError> {
    let has_code = |block: BlockNumber| async move {
        policy
            .run("eth_getCode", || {
                eth::has_code(pool, network, address, block)
            })
            .await
    };

    let head = policy
        .run("eth_blockNumber", || eth::latest_block(pool, network))
        .await?;
    if !has_code(head).await? {
        return Ok(None);
    }

    let (mut low, mut high) = (1, head);
    while low < high {
        let mid = low + (high - low) / 2;
        if has_code(mid).await? {
            high = mid;
        } else {
            low = mid + 1;
        }
    }

    Ok(Some(low))
}
