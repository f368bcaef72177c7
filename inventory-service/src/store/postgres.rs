use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::PooledConnection;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use shared::{DbPool, JournalStatus, StockKey, StoreError};
use tracing::warn;

use super::{LedgerStore, LedgerTx};
use crate::models::*;
use crate::schema::*;

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: DbPool,
}

impl PgLedgerStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let mut conn = self.pool.get_owned().await?;
        AnsiTransactionManager::begin_transaction(&mut *conn).await?;
        Ok(PgLedgerTx { conn: Some(conn) })
    }

    async fn find_stock(&self, key: StockKey) -> Result<Option<StockRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = stock_records::table
            .filter(stock_records::product_id.eq(key.product_id))
            .filter(stock_records::warehouse_id.eq(key.warehouse_id))
            .first::<StockRow>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(StockRecord::from))
    }

    async fn find_journal(&self, order_sn: &str) -> Result<Option<JournalEntry>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = reservation_journal::table
            .filter(reservation_journal::order_sn.eq(order_sn))
            .first::<JournalRow>(&mut conn)
            .await
            .optional()?;
        row.map(JournalEntry::try_from).transpose()
    }

    async fn locked_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        let order_sns = reservation_journal::table
            .filter(reservation_journal::status.eq(JournalStatus::Locked.as_str()))
            .filter(reservation_journal::locked_at.lt(cutoff))
            .order(reservation_journal::locked_at.asc())
            .limit(limit)
            .select(reservation_journal::order_sn)
            .load::<String>(&mut conn)
            .await?;
        Ok(order_sns)
    }
}

/// Owns its pooled connection for the life of the transaction. Dropped
/// without commit or rollback, it rolls back on the runtime before the
/// connection goes back to the pool.
pub struct PgLedgerTx {
    conn: Option<PooledConnection<'static, AsyncPgConnection>>,
}

impl PgLedgerTx {
    fn conn(&mut self) -> Result<&mut AsyncPgConnection, StoreError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| StoreError::Unavailable("transaction already finished".to_string()))
    }
}

impl Drop for PgLedgerTx {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = AnsiTransactionManager::rollback_transaction(&mut *conn).await {
                        warn!("Failed to roll back abandoned transaction: {}", e);
                    }
                });
            }
        }
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_stock(&mut self, key: StockKey) -> Result<Option<StockRecord>, StoreError> {
        let conn = self.conn()?;
        let row = stock_records::table
            .filter(stock_records::product_id.eq(key.product_id))
            .filter(stock_records::warehouse_id.eq(key.warehouse_id))
            .for_update()
            .first::<StockRow>(conn)
            .await
            .optional()?;
        Ok(row.map(StockRecord::from))
    }

    async fn insert_stock(&mut self, record: &StockRecord) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let inserted = diesel::insert_into(stock_records::table)
            .values(&NewStockRow::from(record))
            .on_conflict((stock_records::product_id, stock_records::warehouse_id))
            .do_nothing()
            .execute(conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn update_stock(&mut self, next: &StockRecord, expected_version: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let updated = diesel::update(
            stock_records::table
                .filter(stock_records::product_id.eq(next.product_id))
                .filter(stock_records::warehouse_id.eq(next.warehouse_id))
                .filter(stock_records::version.eq(expected_version)),
        )
        .set((
            stock_records::on_hand.eq(next.on_hand),
            stock_records::locked.eq(next.locked),
            stock_records::version.eq(next.version),
            stock_records::updated_at.eq(next.updated_at),
        ))
        .execute(conn)
        .await?;
        Ok(updated == 1)
    }

    async fn lock_journal(&mut self, order_sn: &str) -> Result<Option<JournalEntry>, StoreError> {
        let conn = self.conn()?;
        let row = reservation_journal::table
            .filter(reservation_journal::order_sn.eq(order_sn))
            .for_update()
            .first::<JournalRow>(conn)
            .await
            .optional()?;
        row.map(JournalEntry::try_from).transpose()
    }

    async fn insert_journal(&mut self, entry: &JournalEntry) -> Result<bool, StoreError> {
        let new_row = NewJournalRow::try_from(entry)?;
        let conn = self.conn()?;
        let inserted = diesel::insert_into(reservation_journal::table)
            .values(&new_row)
            .on_conflict(reservation_journal::order_sn)
            .do_nothing()
            .execute(conn)
            .await?;
        Ok(inserted == 1)
    }

    async fn transition_journal(
        &mut self,
        order_sn: &str,
        from: JournalStatus,
        to: JournalStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let updated = diesel::update(
            reservation_journal::table
                .filter(reservation_journal::order_sn.eq(order_sn))
                .filter(reservation_journal::status.eq(from.as_str())),
        )
        .set((
            reservation_journal::status.eq(to.as_str()),
            reservation_journal::settled_at.eq(Some(at)),
        ))
        .execute(conn)
        .await?;
        Ok(updated == 1)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        if let Some(mut conn) = self.conn.take() {
            AnsiTransactionManager::commit_transaction(&mut *conn).await?;
        }
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        if let Some(mut conn) = self.conn.take() {
            AnsiTransactionManager::rollback_transaction(&mut *conn).await?;
        }
        Ok(())
    }
}
