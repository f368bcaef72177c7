mod memory;
mod postgres;

pub use memory::MemoryOrderStore;
pub use postgres::{PgOrderStore, PgOrderTx};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{OrderStatus, StoreError};
use uuid::Uuid;

use crate::models::{CartLine, NewOrder, NewOrderItem, OrderItem, OrderRecord, OutboxMessage, MessageState};

#[async_trait]
pub trait OrderStore: Clone + Send + Sync + 'static {
    type Tx: OrderTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn checked_cart_lines(&self, user_id: i64) -> Result<Vec<CartLine>, StoreError>;

    async fn find_order(&self, order_sn: &str) -> Result<Option<OrderRecord>, StoreError>;

    async fn order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, StoreError>;

    /// Total count and one page of a user's orders, newest first.
    async fn list_orders(&self, user_id: i64, offset: i64, limit: i64) -> Result<(i64, Vec<OrderRecord>), StoreError>;

    /// Conditional status move; false if the order is no longer in `from`.
    async fn transition_order(
        &self,
        order_sn: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Stores a half message outside any order transaction.
    async fn prepare_message(&self, message: &OutboxMessage) -> Result<(), StoreError>;

    /// Resolves a half message; false if it is no longer PREPARED.
    async fn resolve_message(&self, id: Uuid, to: MessageState) -> Result<bool, StoreError>;

    /// COMMITTED messages whose delivery time has come.
    async fn due_messages(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>, StoreError>;

    /// PREPARED messages created before `cutoff`.
    async fn stale_prepared(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>, StoreError>;

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// The placement transaction: order, items, cart cleanup, timeout
/// scheduling and half-message resolution commit together or not at all.
#[async_trait]
pub trait OrderTx: Send {
    async fn insert_order(&mut self, order: &NewOrder) -> Result<i64, StoreError>;

    async fn insert_items(&mut self, order_id: i64, items: &[NewOrderItem]) -> Result<(), StoreError>;

    /// Deletes the given checked cart rows of `user_id`, returning how many
    /// were still there.
    async fn delete_cart_lines(&mut self, user_id: i64, ids: &[i64]) -> Result<usize, StoreError>;

    async fn enqueue(&mut self, message: &OutboxMessage) -> Result<(), StoreError>;

    async fn resolve_message(&mut self, id: Uuid, to: MessageState) -> Result<bool, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
