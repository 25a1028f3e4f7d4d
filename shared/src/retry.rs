use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

use crate::error::{classify, CallError, ErrorClass, RpcError};

/// Errors that know which [`ErrorClass`] they fall into.
pub trait Classified {
    fn class(&self) -> ErrorClass;
}

impl Classified for RpcError {
    fn class(&self) -> ErrorClass {
        classify(self)
    }
}

impl Classified for CallError {
    fn class(&self) -> ErrorClass {
        CallError::class(self)
    }
}

/// Bounded exponential backoff: `base`, `2 * base`, `4 * base`, ... capped at
/// `cap`, for at most `max_attempts` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let half_base = (self.base.as_millis() as u64 / 2).max(1);

        ExponentialBackoff::from_millis(2)
            .factor(half_base)
            .max_delay(self.cap)
            .take(self.max_attempts.saturating_sub(1))
    }

    /// Runs `op` until it succeeds, fails with a non retryable error, or the
    /// attempts are used up. The last error is returned.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        E: Classified + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        RetryIf::spawn(
            self.delays(),
            op,
            |error: &E| {
                let class = error.class();
                let retry = class.is_retryable();
                if retry {
                    tracing::warn!(%class, %error, label, "Retrying");
                }
                retry
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fast(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base: Duration::from_millis(2),
            cap: Duration::from_millis(4),
        }
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(5),
        };

        let delays: Vec<_> = policy.delays().map(|d| d.as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 5, 5]);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicUsize::new(0);

        let result = fast(5)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RpcError::Timeout)
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = fast(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RpcError::Http {
                    status: 429,
                    body: String::new(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = fast(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RpcError::JsonRpc {
                    code: 3,
                    message: "execution reverted".to_owned(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
