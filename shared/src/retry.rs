use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded retry with jittered exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Runs `op` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the retry budget is spent. `op` receives the attempt
    /// number starting at zero.
    pub async fn run<T, E, R, F, Fut>(&self, is_retryable: R, mut op: F) -> Result<T, E>
    where
        R: Fn(&E) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        let mut delay = self.base_delay;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries && is_retryable(&e) => {
                    attempt += 1;
                    let jitter = {
                        let half = (delay.as_millis() as u64 / 2).max(1);
                        Duration::from_millis(rand::thread_rng().gen_range(0..=half))
                    };
                    debug!(attempt, "retrying after {:?}", delay + jitter);
                    tokio::time::sleep(delay + jitter).await;
                    delay = (delay * 2).min(self.max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = RetryPolicy::new(3)
            .with_base_delay(Duration::from_millis(1))
            .run(|_| true, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { if attempt < 2 { Err("busy") } else { Ok(attempt) } }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_counts_retries_not_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = RetryPolicy::new(3)
            .with_base_delay(Duration::from_millis(1))
            .run(|_| true, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("busy") }
            })
            .await;
        assert_eq!(result, Err("busy"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = RetryPolicy::new(3)
            .run(|e| *e == "busy", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("gone") }
            })
            .await;
        assert_eq!(result, Err("gone"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
