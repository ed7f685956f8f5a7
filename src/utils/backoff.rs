//! Bounded retry for bus and store operations.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// The pre-jitter delay before retry `attempt` (1-based): the base
/// doubled per prior attempt, capped at one minute so a misconfigured
/// attempt count cannot park a consumer for hours.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    const CEILING: Duration = Duration::from_secs(60);
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(CEILING)
}

/// Spreads a delay over `[0, delay]` so parallel consumers retrying the
/// same outage do not stampede in lockstep.
fn full_jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}

/// Runs an async operation up to `attempts` times, sleeping a jittered,
/// exponentially growing delay between failures, and returns the last
/// error when every attempt fails.
pub async fn retry_with_backoff<T, E, Fut>(
    attempts: u32,
    base: Duration,
    mut op: impl FnMut() -> Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => return Err(err),
            Err(_) => tokio::time::sleep(full_jitter(backoff_delay(base, attempt))).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_per_attempt() {
        let base = Duration::from_millis(50);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(50));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(200));
    }

    #[test]
    fn test_delay_is_capped() {
        let base = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, 30), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_delay() {
        let delay = Duration::from_secs(10);
        for _ in 0..100 {
            assert!(full_jitter(delay) <= delay);
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);

        let result: Result<u32, &str> =
            retry_with_backoff(5, Duration::from_millis(1), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<u32, &str> =
            retry_with_backoff(3, Duration::from_millis(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down") }
            })
            .await;

        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);

        let result: Result<u32, &str> =
            retry_with_backoff(0, Duration::from_millis(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
