use std::collections::HashSet;

use async_stream::stream;
use futures::{pin_mut, Stream, StreamExt};
use thiserror::Error;

use crate::block::{BlockNumber, ScanWindow};
use crate::error::{CallError, ErrorClass};
use crate::eth::{self, LogFilter};
use crate::network::{Network, NetworkSettings};
use crate::pool::ConnectionPool;
use crate::record::RawRecord;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Widest window issued, the provider's documented range limit.
    pub max_window: u64,
    /// Range rejections below this width fail the window.
    pub min_window: u64,
    pub policy: RetryPolicy,
}

impl ScanConfig {
    pub fn for_network(
        settings: &NetworkSettings,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            max_window: settings.max_log_range,
            min_window: settings.min_log_range,
            policy,
        }
    }

    fn bounds(&self) -> (u64, u64) {
        let max = self.max_window.max(1);
        (max, self.min_window.clamp(1, max))
    }
}

/// Deduplicated records of one successfully queried window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBatch {
    pub window: ScanWindow,
    pub records: Vec<RawRecord>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("window {window} failed: {error}")]
pub struct WindowFailure {
    pub window: ScanWindow,
    pub error: CallError,
}

/// Streams the logs matching `filter` in `[from, to]`, one item per window,
/// in increasing block order.
///
/// Range rejections shrink the window by half down to the minimum width
/// without using up retry attempts; the shrunk width is kept for the rest
/// of the scan. Rate limits, connection failures and refused credentials
/// are retried on the same window with backoff, terminal errors are not.
/// A window that cannot be queried is yielded as a failure and the
/// scan moves past it. Failing to get any endpoint at all ends the scan.
///
/// The stream can be restarted from any window boundary by passing it as
/// `from`.
pub fn scan<'a>(
    pool: &'a ConnectionPool,
    network: &'a Network,
    filter: &'a LogFilter,
    from: BlockNumber,
    to: BlockNumber,
    config: ScanConfig,
) -> impl Stream<Item = Result<WindowBatch, WindowFailure>> + 'a {
    stream! {
        let (mut size, min_window) = config.bounds();
        let mut seen = HashSet::new();
        let mut start = from;

        while start <= to {
            let mut delays = config.policy.delays();

            let (window, result) = loop {
                let end = start.saturating_add(size - 1).min(to);
                let window = ScanWindow::new(start, end);

                let error = match eth::get_logs(pool, network, filter, window)
                    .await
                {
                    Ok(logs) => break (window, Ok(logs)),
                    Err(error) => error,
                };

                match error.class() {
                    ErrorClass::RangeTooLarge if window.width() > min_window => {
                        size = (window.width() / 2).max(min_window);
                        tracing::debug!(
                            network = %network,
                            %window,
                            size,
                            "Range rejected, shrinking window"
                        );
                        continue;
                    }
                    ErrorClass::RangeTooLarge
                    | ErrorClass::Configuration
                    | ErrorClass::Terminal => {
                        break (window, Err(error));
                    }
                    _ => {}
                }

                match delays.next() {
                    Some(delay) => {
                        tracing::warn!(
                            network = %network,
                            %window,
                            %error,
                            ?delay,
                            "Window query failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => break (window, Err(error)),
                }
            };

            match result {
                Ok(logs) => {
                    let records = logs
                        .into_iter()
                        .map(|log| RawRecord::from_log(network.clone(), log))
                        .filter(|record| seen.insert(record.key()))
                        .collect();
                    yield Ok(WindowBatch { window, records });
                }
                Err(error) => {
                    let fatal = error.class() == ErrorClass::Configuration;
                    tracing::warn!(
                        network = %network,
                        %window,
                        %error,
                        "Giving up on window"
                    );
                    yield Err(WindowFailure { window, error });
                    if fatal {
                        break;
                    }
                }
            }

            match window.to.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }
    }
}

/// Everything a scan produced, drained into memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub records: Vec<RawRecord>,
    pub failed: Vec<WindowFailure>,
}

pub async fn collect<S>(stream: S) -> ScanOutcome
where
    S: Stream<Item = Result<WindowBatch, WindowFailure>>,
{
    pin_mut!(stream);

    let mut outcome = ScanOutcome::default();
    while let Some(item) = stream.next().await {
        match item {
            Ok(batch) => outcome.records.extend(batch.records),
            Err(failure) => outcome.failed.push(failure),
        }
    }

    outcome
}
