use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// Bounded retry with an explicit delay table; the last entry repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Vec<Duration>,
}

/// Every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: vec![delay],
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(idx).copied().unwrap_or_default()
    }

    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, Exhausted<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= self.max_attempts => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_table_repeats_last_entry() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: vec![Duration::from_millis(100), Duration::from_millis(250)],
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(250));
        assert_eq!(policy.delay_after(7), Duration::from_millis(250));
        assert_eq!(RetryPolicy { max_attempts: 1, backoff: vec![] }.delay_after(1), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_op_runs_exactly_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::fixed(8, Duration::from_millis(250));
        let started = tokio::time::Instant::now();

        let out: Result<(), _> = policy
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope")
            })
            .await;

        let exhausted = out.unwrap_err();
        assert_eq!(exhausted.attempts, 8);
        assert_eq!(exhausted.last_error, "nope");
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        // no sleep after the final failure
        assert_eq!(started.elapsed(), Duration::from_millis(250 * 7));
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_then_success_takes_four_calls() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::fixed(8, Duration::from_millis(250));

        let out = policy
            .run("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
