use serde::{Deserialize, Serialize};
use shared::config::CoreConfig;
use shared::deadline::Deadline;
use shared::retry::RetryPolicy;
use shared::{ErrorCode, OrderStatus};
use std::sync::Arc;
use tracing::info;

use crate::clients::{settle, InventoryClient, Settlement};
use crate::error::OrderError;
use crate::models::{OrderItem, OrderRecord};
use crate::platform::CorePlatform;
use crate::store::OrderStore;

pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: OrderRecord,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPage {
    pub total: i64,
    pub orders: Vec<OrderRecord>,
}

/// Reads and status changes on placed orders.
pub struct OrderService<S> {
    platform: CorePlatform<S>,
    inventory: Arc<dyn InventoryClient>,
    config: CoreConfig,
}

impl<S: OrderStore> OrderService<S> {
    pub fn new(platform: CorePlatform<S>, inventory: Arc<dyn InventoryClient>, config: CoreConfig) -> Self {
        Self { platform, inventory, config }
    }

    async fn load(&self, order_sn: &str) -> Result<OrderRecord, OrderError> {
        self.platform
            .store
            .find_order(order_sn)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_sn.to_string()))
    }

    /// Another user's order is reported as missing.
    pub async fn order_detail(&self, order_sn: &str, user_id: i64) -> Result<OrderDetail, OrderError> {
        let order = self.load(order_sn).await?;
        if order.user_id != user_id {
            return Err(OrderError::NotFound(order_sn.to_string()));
        }
        let items = self.platform.store.order_items(order.id).await?;
        Ok(OrderDetail { order, items })
    }

    /// `page` counts from 1.
    pub async fn list_orders(&self, user_id: i64, page: i64, per_page: i64) -> Result<OrderPage, OrderError> {
        if page < 1 {
            return Err(OrderError::Validation("page starts at 1".to_string()));
        }
        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            return Err(OrderError::Validation(format!("per_page must be between 1 and {}", MAX_PER_PAGE)));
        }
        let (total, orders) = self
            .platform
            .store
            .list_orders(user_id, (page - 1) * per_page, per_page)
            .await?;
        Ok(OrderPage { total, orders })
    }

    /// PENDING→PAID commits the reservation before marking the order;
    /// PENDING→CLOSED releases it first. Asking for the current status is a
    /// no-op.
    pub async fn update_order_status(&self, order_sn: &str, status: OrderStatus) -> Result<OrderRecord, OrderError> {
        let order = self.load(order_sn).await?;
        if order.status == status {
            return Ok(order);
        }
        if order.status != OrderStatus::Pending {
            return Err(OrderError::TerminalState { order_sn: order_sn.to_string(), current: order.status });
        }

        let settlement = match status {
            OrderStatus::Paid => Settlement::Commit,
            OrderStatus::Closed => Settlement::Release,
            OrderStatus::Pending => return Ok(order),
        };
        let deadline = Deadline::after(self.config.request_timeout());
        let policy = RetryPolicy::new(self.config.lock_retry_attempts);
        match settle(self.inventory.as_ref(), order_sn, settlement, policy, deadline).await {
            Ok(_) => {}
            Err(e) if e.code == ErrorCode::NotFound && settlement == Settlement::Release => {}
            Err(e) => return Err(e.into()),
        }

        let now = self.platform.clock.now();
        if !self
            .platform
            .store
            .transition_order(order_sn, OrderStatus::Pending, status, now)
            .await?
        {
            let current = self.load(order_sn).await?;
            if current.status == status {
                return Ok(current);
            }
            return Err(OrderError::TerminalState { order_sn: order_sn.to_string(), current: current.status });
        }
        info!(order_sn, %status, "order status updated");
        self.load(order_sn).await
    }
}
