use std::time::Duration;

use governor::{
    DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter,
};

/// Enforces a minimum spacing between calls through one endpoint handle.
/// Callers wait for their turn, calls are never dropped.
pub struct RateLimiter {
    min_interval: Duration,
    inner: Option<DefaultDirectRateLimiter>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        // A zero interval yields no quota, i.e. an unlimited handle.
        let inner =
            Quota::with_period(min_interval).map(GovernorRateLimiter::direct);

        Self {
            min_interval,
            inner,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub async fn acquire(&self) {
        if let Some(limiter) = &self.inner {
            limiter.until_ready().await;
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    // Slack for the limiter clock and the test clock not being the same.
    const SLACK: Duration = Duration::from_millis(5);

    #[tokio::test]
    async fn consecutive_calls_are_spaced() {
        let interval = Duration::from_millis(40);
        let limiter = RateLimiter::new(interval);
        let calls = 5;

        let started = Instant::now();
        for _ in 0..calls {
            limiter.acquire().await;
        }

        assert!(started.elapsed() + SLACK >= interval * (calls - 1));
    }

    async fn drive(limiter: &RateLimiter) {
        for _ in 0..3 {
            limiter.acquire().await;
        }
    }

    #[tokio::test]
    async fn distinct_limiters_do_not_serialize() {
        let interval = Duration::from_millis(100);
        let first = RateLimiter::new(interval);
        let second = RateLimiter::new(interval);

        let started = Instant::now();
        futures::join!(drive(&first), drive(&second));
        let elapsed = started.elapsed();

        assert!(elapsed + SLACK >= interval * 2);
        assert!(elapsed < interval * 4);
    }

    #[tokio::test]
    async fn zero_interval_never_waits() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let started = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }

        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
