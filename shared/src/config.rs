use clap::Args;
use std::time::Duration;

/// Upper bound for the payment window: thirty days.
pub const MAX_PAYMENT_WINDOW_SECONDS: u64 = 30 * 24 * 60 * 60;
/// Upper bound for the half-message check-back age: one day.
pub const MAX_HALFMESSAGE_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// Tunables shared by every service that touches stock or orders.
#[derive(Debug, Clone, Args)]
pub struct CoreConfig {
    /// Delay before an unpaid order is closed and its stock released
    #[arg(
        long,
        env = "PAYMENT_WINDOW_SECONDS",
        default_value_t = 1800,
        value_parser = clap::value_parser!(u64).range(1..=MAX_PAYMENT_WINDOW_SECONDS)
    )]
    pub payment_window_seconds: u64,

    #[arg(long, env = "LEASE_TTL_MS", default_value_t = 5000)]
    pub lease_ttl_ms: u64,

    /// How long to poll a busy lease before giving up
    #[arg(long, env = "LEASE_WAIT_MS", default_value_t = 3000)]
    pub lease_wait_ms: u64,

    /// Retries after the first attempt when a version check is lost
    #[arg(long, env = "LOCK_RETRY_ATTEMPTS", default_value_t = 3)]
    pub lock_retry_attempts: u32,

    /// Age at which an unresolved half message is checked back
    #[arg(
        long,
        env = "BROKER_HALFMESSAGE_TIMEOUT_MS",
        default_value_t = 60_000,
        value_parser = clap::value_parser!(u64).range(1..=MAX_HALFMESSAGE_TIMEOUT_MS)
    )]
    pub broker_halfmessage_timeout_ms: u64,

    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    pub request_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            payment_window_seconds: 1800,
            lease_ttl_ms: 5000,
            lease_wait_ms: 3000,
            lock_retry_attempts: 3,
            broker_halfmessage_timeout_ms: 60_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl CoreConfig {
    pub fn payment_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.payment_window_seconds as i64)
    }

    pub fn halfmessage_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.broker_halfmessage_timeout_ms as i64)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn lease_wait(&self) -> Duration {
        Duration::from_millis(self.lease_wait_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
