use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// Absolute point in time by which an inbound request must finish. Every
/// outbound call made on its behalf is bounded by what is left of it.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self { at: Instant::now() + budget }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DeadlineExceeded> {
        tokio::time::timeout_at(self.at, fut).await.map_err(|_| DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_completes_inside_budget() {
        let deadline = Deadline::after(Duration::from_secs(5));
        assert_eq!(deadline.run(async { 7 }).await, Ok(7));
        assert!(!deadline.is_expired());
    }

    #[tokio::test]
    async fn run_fails_once_budget_is_spent() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result = deadline.run(tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(result, Err(DeadlineExceeded));
        assert!(deadline.is_expired());
    }
}
