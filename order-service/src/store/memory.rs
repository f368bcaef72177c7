use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{OrderStatus, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{OrderStore, OrderTx};
use crate::models::{CartLine, MessageState, NewOrder, NewOrderItem, OrderItem, OrderRecord, OutboxMessage};

#[derive(Debug, Clone, Default)]
struct OrderTables {
    orders: Vec<OrderRecord>,
    items: Vec<OrderItem>,
    cart: Vec<CartLine>,
    outbox: Vec<OutboxMessage>,
    next_id: i64,
}

impl OrderTables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn resolve(&mut self, id: Uuid, to: MessageState) -> bool {
        match self.outbox.iter_mut().find(|m| m.id == id) {
            Some(message) if message.state == MessageState::Prepared => {
                message.state = to;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    order_insert: AtomicBool,
    prepare: AtomicBool,
    enqueue: AtomicBool,
}

/// In-process order database with switches for injecting failures.
#[derive(Clone, Default)]
pub struct MemoryOrderStore {
    tables: Arc<Mutex<OrderTables>>,
    faults: Arc<Faults>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_cart_line(&self, user_id: i64, product_id: i64, quantity: i32, checked: bool) -> i64 {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        tables.cart.push(CartLine { id, user_id, product_id, quantity, checked });
        id
    }

    pub async fn cart_lines(&self, user_id: i64) -> Vec<CartLine> {
        let tables = self.tables.lock().await;
        tables.cart.iter().filter(|l| l.user_id == user_id).cloned().collect()
    }

    pub async fn remove_cart_line(&self, id: i64) {
        self.tables.lock().await.cart.retain(|l| l.id != id);
    }

    pub async fn orders(&self) -> Vec<OrderRecord> {
        self.tables.lock().await.orders.clone()
    }

    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        self.tables.lock().await.outbox.clone()
    }

    pub async fn outbox_for(&self, order_sn: &str, topic: &str) -> Option<OutboxMessage> {
        let tables = self.tables.lock().await;
        tables
            .outbox
            .iter()
            .find(|m| m.order_sn == order_sn && m.topic == topic)
            .cloned()
    }

    pub fn fail_order_insert(&self, fail: bool) {
        self.faults.order_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_prepare(&self, fail: bool) {
        self.faults.prepare.store(fail, Ordering::SeqCst);
    }

    pub fn fail_enqueue(&self, fail: bool) {
        self.faults.enqueue.store(fail, Ordering::SeqCst);
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {} failure", what))
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    type Tx = MemoryOrderTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let live = self.tables.clone().lock_owned().await;
        let staged = live.clone();
        Ok(MemoryOrderTx { live, staged, faults: self.faults.clone() })
    }

    async fn checked_cart_lines(&self, user_id: i64) -> Result<Vec<CartLine>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .cart
            .iter()
            .filter(|l| l.user_id == user_id && l.checked)
            .cloned()
            .collect())
    }

    async fn find_order(&self, order_sn: &str) -> Result<Option<OrderRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.orders.iter().find(|o| o.order_sn == order_sn).cloned())
    }

    async fn order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.items.iter().filter(|i| i.order_id == order_id).cloned().collect())
    }

    async fn list_orders(&self, user_id: i64, offset: i64, limit: i64) -> Result<(i64, Vec<OrderRecord>), StoreError> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<&OrderRecord> = tables.orders.iter().filter(|o| o.user_id == user_id).collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = orders.len() as i64;
        let page = orders
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((total, page))
    }

    async fn transition_order(
        &self,
        order_sn: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.orders.iter_mut().find(|o| o.order_sn == order_sn) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn prepare_message(&self, message: &OutboxMessage) -> Result<(), StoreError> {
        if self.faults.prepare.load(Ordering::SeqCst) {
            return Err(injected("half message"));
        }
        self.tables.lock().await.outbox.push(message.clone());
        Ok(())
    }

    async fn resolve_message(&self, id: Uuid, to: MessageState) -> Result<bool, StoreError> {
        Ok(self.tables.lock().await.resolve(id, to))
    }

    async fn due_messages(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let tables = self.tables.lock().await;
        let mut due: Vec<OutboxMessage> = tables
            .outbox
            .iter()
            .filter(|m| m.state == MessageState::Committed && m.deliver_after <= now)
            .cloned()
            .collect();
        due.sort_by_key(|m| m.deliver_after);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn stale_prepared(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let tables = self.tables.lock().await;
        let mut stale: Vec<OutboxMessage> = tables
            .outbox
            .iter()
            .filter(|m| m.state == MessageState::Prepared && m.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|m| m.created_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(message) = tables.outbox.iter_mut().find(|m| m.id == id) {
            message.state = MessageState::Published;
            message.published_at = Some(at);
        }
        Ok(())
    }
}

pub struct MemoryOrderTx {
    live: OwnedMutexGuard<OrderTables>,
    staged: OrderTables,
    faults: Arc<Faults>,
}

#[async_trait]
impl OrderTx for MemoryOrderTx {
    async fn insert_order(&mut self, order: &NewOrder) -> Result<i64, StoreError> {
        if self.faults.order_insert.load(Ordering::SeqCst) {
            return Err(injected("order insert"));
        }
        if self.staged.orders.iter().any(|o| o.order_sn == order.order_sn) {
            return Err(StoreError::Corrupt(format!("duplicate order_sn {}", order.order_sn)));
        }
        let id = self.staged.next_id();
        self.staged.orders.push(OrderRecord {
            id,
            order_sn: order.order_sn.clone(),
            user_id: order.user_id,
            status: order.status,
            order_amount: order.order_amount.clone(),
            address: order.address.clone(),
            recipient_name: order.recipient_name.clone(),
            recipient_phone: order.recipient_phone.clone(),
            post: order.post.clone(),
            created_at: order.created_at,
            updated_at: order.created_at,
        });
        Ok(id)
    }

    async fn insert_items(&mut self, order_id: i64, items: &[NewOrderItem]) -> Result<(), StoreError> {
        for item in items {
            let id = self.staged.next_id();
            self.staged.items.push(OrderItem {
                id,
                order_id,
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                product_image: item.product_image.clone(),
                unit_price: item.unit_price.clone(),
                quantity: item.quantity,
            });
        }
        Ok(())
    }

    async fn delete_cart_lines(&mut self, user_id: i64, ids: &[i64]) -> Result<usize, StoreError> {
        let before = self.staged.cart.len();
        self.staged
            .cart
            .retain(|l| !(l.user_id == user_id && l.checked && ids.contains(&l.id)));
        Ok(before - self.staged.cart.len())
    }

    async fn enqueue(&mut self, message: &OutboxMessage) -> Result<(), StoreError> {
        if self.faults.enqueue.load(Ordering::SeqCst) {
            return Err(injected("delayed message"));
        }
        self.staged.outbox.push(message.clone());
        Ok(())
    }

    async fn resolve_message(&mut self, id: Uuid, to: MessageState) -> Result<bool, StoreError> {
        Ok(self.staged.resolve(id, to))
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        *self.live = self.staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
