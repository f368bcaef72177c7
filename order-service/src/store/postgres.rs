use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::PooledConnection;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use shared::{DbPool, OrderStatus, StoreError};
use tracing::warn;
use uuid::Uuid;

use super::{OrderStore, OrderTx};
use crate::models::*;
use crate::schema::*;

#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn load_messages(rows: Vec<OutboxRow>) -> Result<Vec<OutboxMessage>, StoreError> {
    rows.into_iter().map(OutboxMessage::try_from).collect()
}

#[async_trait]
impl OrderStore for PgOrderStore {
    type Tx = PgOrderTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let mut conn = self.pool.get_owned().await?;
        AnsiTransactionManager::begin_transaction(&mut *conn).await?;
        Ok(PgOrderTx { conn: Some(conn) })
    }

    async fn checked_cart_lines(&self, user_id: i64) -> Result<Vec<CartLine>, StoreError> {
        let mut conn = self.pool.get().await?;
        let lines = cart_lines::table
            .filter(cart_lines::user_id.eq(user_id))
            .filter(cart_lines::checked.eq(true))
            .order(cart_lines::id.asc())
            .load::<CartLine>(&mut conn)
            .await?;
        Ok(lines)
    }

    async fn find_order(&self, order_sn: &str) -> Result<Option<OrderRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let row = orders::table
            .filter(orders::order_sn.eq(order_sn))
            .first::<OrderRow>(&mut conn)
            .await
            .optional()?;
        row.map(OrderRecord::try_from).transpose()
    }

    async fn order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = order_items::table
            .filter(order_items::order_id.eq(order_id))
            .order(order_items::id.asc())
            .load::<OrderItemRow>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(OrderItem::from).collect())
    }

    async fn list_orders(&self, user_id: i64, offset: i64, limit: i64) -> Result<(i64, Vec<OrderRecord>), StoreError> {
        let mut conn = self.pool.get().await?;
        let total = orders::table
            .filter(orders::user_id.eq(user_id))
            .count()
            .get_result::<i64>(&mut conn)
            .await?;
        let rows = orders::table
            .filter(orders::user_id.eq(user_id))
            .order((orders::created_at.desc(), orders::id.desc()))
            .offset(offset)
            .limit(limit)
            .load::<OrderRow>(&mut conn)
            .await?;
        let orders = rows
            .into_iter()
            .map(OrderRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((total, orders))
    }

    async fn transition_order(
        &self,
        order_sn: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            orders::table
                .filter(orders::order_sn.eq(order_sn))
                .filter(orders::status.eq(from.as_str())),
        )
        .set((orders::status.eq(to.as_str()), orders::updated_at.eq(at)))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    async fn prepare_message(&self, message: &OutboxMessage) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(outbox_messages::table)
            .values(&OutboxRow::from(message))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn resolve_message(&self, id: Uuid, to: MessageState) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        resolve(&mut conn, id, to).await
    }

    async fn due_messages(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = outbox_messages::table
            .filter(outbox_messages::state.eq(MessageState::Committed.as_str()))
            .filter(outbox_messages::deliver_after.le(now))
            .order(outbox_messages::deliver_after.asc())
            .limit(limit)
            .load::<OutboxRow>(&mut conn)
            .await?;
        load_messages(rows)
    }

    async fn stale_prepared(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = outbox_messages::table
            .filter(outbox_messages::state.eq(MessageState::Prepared.as_str()))
            .filter(outbox_messages::created_at.lt(cutoff))
            .order(outbox_messages::created_at.asc())
            .limit(limit)
            .load::<OutboxRow>(&mut conn)
            .await?;
        load_messages(rows)
    }

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::update(outbox_messages::table.filter(outbox_messages::id.eq(id)))
            .set((
                outbox_messages::state.eq(MessageState::Published.as_str()),
                outbox_messages::published_at.eq(Some(at)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

async fn resolve(conn: &mut AsyncPgConnection, id: Uuid, to: MessageState) -> Result<bool, StoreError> {
    let updated = diesel::update(
        outbox_messages::table
            .filter(outbox_messages::id.eq(id))
            .filter(outbox_messages::state.eq(MessageState::Prepared.as_str())),
    )
    .set(outbox_messages::state.eq(to.as_str()))
    .execute(conn)
    .await?;
    Ok(updated == 1)
}

pub struct PgOrderTx {
    conn: Option<PooledConnection<'static, AsyncPgConnection>>,
}

impl PgOrderTx {
    fn conn(&mut self) -> Result<&mut AsyncPgConnection, StoreError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| StoreError::Unavailable("transaction already finished".to_string()))
    }
}

impl Drop for PgOrderTx {
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
impl OrderTx for PgOrderTx {
    async fn insert_order(&mut self, order: &NewOrder) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let id = diesel::insert_into(orders::table)
            .values(&NewOrderRow::from(order))
            .returning(orders::id)
            .get_result::<i64>(conn)
            .await?;
        Ok(id)
    }

    async fn insert_items(&mut self, order_id: i64, items: &[NewOrderItem]) -> Result<(), StoreError> {
        let rows: Vec<NewOrderItemRow> = items.iter().map(|item| NewOrderItemRow::new(order_id, item)).collect();
        let conn = self.conn()?;
        diesel::insert_into(order_items::table)
            .values(&rows)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn delete_cart_lines(&mut self, user_id: i64, ids: &[i64]) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let deleted = diesel::delete(
            cart_lines::table
                .filter(cart_lines::user_id.eq(user_id))
                .filter(cart_lines::checked.eq(true))
                .filter(cart_lines::id.eq_any(ids)),
        )
        .execute(conn)
        .await?;
        Ok(deleted)
    }

    async fn enqueue(&mut self, message: &OutboxMessage) -> Result<(), StoreError> {
        let row = OutboxRow::from(message);
        let conn = self.conn()?;
        diesel::insert_into(outbox_messages::table)
            .values(&row)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn resolve_message(&mut self, id: Uuid, to: MessageState) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        resolve(conn, id, to).await
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
