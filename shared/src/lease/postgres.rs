use async_trait::async_trait;
use diesel::sql_types::{BigInt, Text};
use diesel_async::RunQueryDsl;
use std::time::Duration;

use super::{KvLease, LeaseError};
use crate::DbPool;

/// Leases kept in a `leases` table, timed by the database clock so every
/// replica agrees on expiry.
#[derive(Clone)]
pub struct PgLease {
    pool: DbPool,
}

impl PgLease {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvLease for PgLease {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LeaseError> {
        let mut conn = self.pool.get().await.map_err(|e| LeaseError::Store(e.to_string()))?;
        let taken = diesel::sql_query(
            "INSERT INTO leases (lease_key, holder, expires_at) \
             VALUES ($1, $2, now() + $3 * interval '1 millisecond') \
             ON CONFLICT (lease_key) DO UPDATE \
             SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at \
             WHERE leases.expires_at < now() OR leases.holder = EXCLUDED.holder",
        )
        .bind::<Text, _>(key)
        .bind::<Text, _>(holder)
        .bind::<BigInt, _>(ttl.as_millis() as i64)
        .execute(&mut conn)
        .await
        .map_err(|e| LeaseError::Store(e.to_string()))?;
        Ok(taken == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<(), LeaseError> {
        let mut conn = self.pool.get().await.map_err(|e| LeaseError::Store(e.to_string()))?;
        diesel::sql_query("DELETE FROM leases WHERE lease_key = $1 AND holder = $2")
            .bind::<Text, _>(key)
            .bind::<Text, _>(holder)
            .execute(&mut conn)
            .await
            .map_err(|e| LeaseError::Store(e.to_string()))?;
        Ok(())
    }
}
