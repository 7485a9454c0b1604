use std::future::Future;
use std::time::Duration;

/// Bounded retry settings for a single outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. 1 disables retry.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            jitter: Duration::from_millis(100),
        }
    }
}

/// Error that ended a retry loop, with the attempt count it took to get there.
#[derive(Debug)]
pub struct RetryTerminal<E> {
    pub error: E,
    pub attempts: u32,
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the attempt budget is
/// spent. `key` seeds the jitter so concurrent callers don't retry in lockstep.
pub async fn run_with_retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    key: i64,
    mut op: F,
    mut is_retryable: R,
) -> Result<(T, u32), RetryTerminal<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) if attempt < max_attempts && is_retryable(&error) => {
                let delay = backoff_delay(policy, attempt, key);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(error) => {
                return Err(RetryTerminal {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}

pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, key: i64) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    let exponential_ms = policy
        .initial_backoff
        .as_millis()
        .saturating_mul(1u128 << shift)
        .min(policy.max_backoff.as_millis());

    let jitter_cap = policy.jitter.as_millis();
    let jitter_ms = if jitter_cap == 0 {
        0
    } else {
        mix(key, attempt) as u128 % (jitter_cap + 1)
    };

    let total = exponential_ms.saturating_add(jitter_ms);
    Duration::from_millis(u64::try_from(total).unwrap_or(u64::MAX))
}

// splitmix64 finalizer
fn mix(key: i64, attempt: u32) -> u64 {
    let mut x = (key as u64) ^ (attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::{backoff_delay, run_with_retry, RetryPolicy};
    use std::cell::Cell;
    use std::time::Duration;

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn retryable_errors_consume_the_budget() {
        let calls = Cell::new(0u32);
        let result = run_with_retry(
            &instant_policy(3),
            7,
            |_| {
                calls.set(calls.get() + 1);
                async { Err::<(), _>("transient") }
            },
            |_| true,
        )
        .await;

        let terminal = result.expect_err("every attempt fails");
        assert_eq!(terminal.attempts, 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn fatal_error_stops_immediately() {
        let result = run_with_retry(
            &instant_policy(5),
            7,
            |_| async { Err::<(), _>("fatal") },
            |_| false,
        )
        .await;

        assert_eq!(result.expect_err("fatal").attempts, 1);
    }

    #[tokio::test]
    async fn success_after_retry_reports_attempt() {
        let result = run_with_retry(
            &instant_policy(4),
            7,
            |attempt| async move {
                if attempt < 3 {
                    Err("transient")
                } else {
                    Ok("page")
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.expect("third attempt succeeds"), ("page", 3));
    }

    #[test]
    fn backoff_is_capped_and_jitter_bounded() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
            jitter: Duration::from_millis(50),
        };

        let first = backoff_delay(&policy, 1, 42);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));

        let late = backoff_delay(&policy, 9, 42);
        assert!(late >= Duration::from_millis(1_000) && late <= Duration::from_millis(1_050));

        assert_eq!(backoff_delay(&policy, 2, 42), backoff_delay(&policy, 2, 42));
    }
}
