mod memory;
mod postgres;

pub use memory::MemoryLease;
pub use postgres::PgLease;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease {key} is held elsewhere")]
    Busy { key: String },
    #[error("lease store error: {0}")]
    Store(String),
}

/// Named, time-bounded mutual exclusion held in a store shared by every
/// replica. A lease only narrows contention; it never replaces row locks.
#[async_trait]
pub trait KvLease: Send + Sync {
    /// Takes `key` for `holder` if it is free, expired, or already held by
    /// `holder`. Returns whether the lease is now held.
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LeaseError>;

    /// Gives `key` up if `holder` still holds it.
    async fn release(&self, key: &str, holder: &str) -> Result<(), LeaseError>;
}

pub fn stock_lease_key(product_id: i64) -> String {
    format!("stock:{}", product_id)
}

pub fn placement_lease_key(user_id: i64) -> String {
    format!("placement:{}", user_id)
}

/// A held lease. Dropping the guard without calling [`LeaseGuard::release`]
/// (panic, cancelled future) still hands the key back on the runtime.
pub struct LeaseGuard {
    store: Arc<dyn KvLease>,
    key: String,
    holder: String,
    released: bool,
}

impl LeaseGuard {
    pub async fn acquire(
        store: Arc<dyn KvLease>,
        key: impl Into<String>,
        ttl: Duration,
        wait: Duration,
    ) -> Result<Self, LeaseError> {
        let key = key.into();
        let holder = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut backoff = Duration::from_millis(5);

        loop {
            if store.try_acquire(&key, &holder, ttl).await? {
                debug!(%key, "lease acquired");
                return Ok(Self { store, key, holder, released: false });
            }
            if started.elapsed() + backoff > wait {
                return Err(LeaseError::Busy { key });
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_millis(200));
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(mut self) -> Result<(), LeaseError> {
        self.released = true;
        self.store.release(&self.key, &self.holder).await
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let holder = std::mem::take(&mut self.holder);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release(&key, &holder).await {
                        warn!(%key, error = %e, "failed to release abandoned lease");
                    }
                });
            }
            Err(_) => warn!(%key, "no runtime to release abandoned lease, leaving it to expire"),
        }
    }
}

/// Several leases taken in sorted order, so two callers asking for
/// overlapping sets cannot wait on each other.
pub struct LeaseSet {
    guards: Vec<LeaseGuard>,
}

impl LeaseSet {
    pub async fn acquire<I>(
        store: Arc<dyn KvLease>,
        keys: I,
        ttl: Duration,
        wait: Duration,
    ) -> Result<Self, LeaseError>
    where
        I: IntoIterator<Item = String>,
    {
        let keys: BTreeSet<String> = keys.into_iter().collect();
        let mut guards: Vec<LeaseGuard> = Vec::with_capacity(keys.len());
        for key in keys {
            match LeaseGuard::acquire(store.clone(), key, ttl, wait).await {
                Ok(guard) => guards.push(guard),
                Err(e) => {
                    release_all(guards).await;
                    return Err(e);
                }
            }
        }
        Ok(Self { guards })
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub async fn release(self) {
        release_all(self.guards).await;
    }
}

async fn release_all(guards: Vec<LeaseGuard>) {
    for guard in guards.into_iter().rev() {
        let key = guard.key().to_string();
        if let Err(e) = guard.release().await {
            warn!(%key, error = %e, "failed to release lease");
        }
    }
}
