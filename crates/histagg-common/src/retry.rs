//! Reusable retry policies
//!
//! Every operation that crosses the network boundary to the object store is
//! wrapped in one of two policies instead of an ad hoc loop at each call
//! site:
//!
//! - [`RetryPolicy`]: a fixed attempt budget with exponential backoff, for
//!   reads, uploads, copies, and metadata patches.
//! - [`DeadlinePolicy`]: a wall-clock budget, for deletes, whose latency is
//!   less predictable than read/write latency.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::warn;

/// Attempt-bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Backoff multiplier applied after each failed attempt
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 3 attempts, 2s initial delay, doubling
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    ///
    /// The last error is returned unchanged so callers can classify it.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        mut op: F,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delay = self.base_delay;

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}...",
                        what, attempt, self.max_attempts, e, delay
                    );
                    sleep(delay).await;
                    delay *= self.multiplier;
                },
                Err(e) => return Err(e),
            }
        }

        unreachable!("retry loop always returns")
    }
}

/// Wall-clock-bounded retry.
///
/// Attempts are repeated at a fixed interval until one succeeds or the
/// deadline elapses; the last error is returned on expiry.
#[derive(Debug, Clone, Copy)]
pub struct DeadlinePolicy {
    /// Total time budget across all attempts
    pub deadline: Duration,
    /// Pause between attempts
    pub interval: Duration,
}

impl DeadlinePolicy {
    pub const fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            interval: Duration::from_secs(2),
        }
    }

    /// Run `op` until it succeeds or `deadline` has elapsed.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        mut op: F,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let start = Instant::now();

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if start.elapsed() + self.interval >= self.deadline {
                        return Err(e);
                    }
                    warn!(
                        "{} failed: {}. Retrying in {:?} ({:?} of {:?} budget used)",
                        what,
                        e,
                        self.interval,
                        start.elapsed(),
                        self.deadline
                    );
                    sleep(self.interval).await;
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_first_attempt() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run("op", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failure() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run("op", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_attempt_budget() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run("op", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("persistent".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "persistent");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retrying_on_expiry() {
        let policy = DeadlinePolicy {
            deadline: Duration::from_secs(10),
            interval: Duration::from_secs(2),
        };
        let attempts = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .run("delete", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("still failing".to_string()) }
            })
            .await;

        assert!(result.is_err());
        // 5 intervals of 2s fit in the 10s budget
        assert!(attempts.load(Ordering::SeqCst) <= 5);
        assert!(attempts.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_first_success() {
        let policy = DeadlinePolicy::new(Duration::from_secs(60));
        let attempts = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run("delete", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err("busy".to_string())
                    } else {
                        Ok(1)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
