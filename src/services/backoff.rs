use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Jittered exponential backoff: `initial * factor^attempt`, capped, then
/// scaled by a random factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    jitter: f64,
}

impl BackoffPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, factor: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            factor,
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sleep before retry number `attempt + 1` (attempt 0 is the first call).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.factor.powi(attempt.min(30) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let scale = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * scale).max(0.0))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or has
    /// been retried `max_retries` times. The last error is returned as is.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F, is_retryable: impl Fn(&E) -> bool) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Process-wide minimum spacing between outbound requests.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Sleep until `min_interval` has passed since the previous call.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    struct Unavailable(&'static str);

    impl std::fmt::Display for Unavailable {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let policy = BackoffPolicy::new(3, Duration::from_secs(1), 2.0).with_jitter(0.0);
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_jitter_stays_within_twenty_percent() {
        let policy = BackoffPolicy::new(3, Duration::from_secs(1), 2.0);
        for _ in 0..200 {
            let d = policy.delay(1).as_secs_f64();
            assert!((1.6..=2.4).contains(&d), "delay {d} out of bounds");
        }
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = BackoffPolicy::new(10, Duration::from_secs(1), 2.0)
            .with_jitter(0.0)
            .with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.delay(8), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_call_runs_four_times_and_returns_original_error() {
        let policy = BackoffPolicy::new(3, Duration::from_secs(1), 2.0);
        let calls = AtomicU32::new(0);

        let result: Result<(), Unavailable> = policy
            .retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Unavailable("index down")) }
                },
                |_| true,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result, Err(Unavailable("index down")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_returned_immediately() {
        let policy = BackoffPolicy::new(3, Duration::from_secs(1), 2.0);
        let calls = AtomicU32::new(0);

        let result: Result<(), Unavailable> = policy
            .retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Unavailable("gone")) }
                },
                |_| false,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let policy = BackoffPolicy::new(3, Duration::from_secs(1), 2.0);
        let calls = AtomicU32::new(0);

        let result = policy
            .retry(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(Unavailable("flaky"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_calls() {
        let mut limiter = RateLimiter::new(Duration::from_millis(250));
        let start = Instant::now();

        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
