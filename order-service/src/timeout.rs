use async_trait::async_trait;
use shared::config::CoreConfig;
use shared::consumer::{ConsumeResult, MessageHandler};
use shared::deadline::Deadline;
use shared::retry::RetryPolicy;
use shared::{ErrorCode, OrderSnMessage, OrderStatus};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clients::{settle, InventoryClient, Settlement};
use crate::error::OrderError;
use crate::platform::CorePlatform;
use crate::store::OrderStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The placement rolled back; there is nothing to close.
    OrderMissing,
    AlreadyPaid,
    /// The reservation is committed but the order is not PAID yet; payment
    /// is finishing.
    PaymentInFlight,
    Closed,
    AlreadyClosed,
}

/// Consumes `order_timeout`: closes orders still unpaid when the payment
/// window ends and hands their stock back.
pub struct TimeoutHandler<S> {
    platform: CorePlatform<S>,
    inventory: Arc<dyn InventoryClient>,
    config: CoreConfig,
}

impl<S: OrderStore> TimeoutHandler<S> {
    pub fn new(platform: CorePlatform<S>, inventory: Arc<dyn InventoryClient>, config: CoreConfig) -> Self {
        Self { platform, inventory, config }
    }

    pub async fn close_unpaid(&self, order_sn: &str) -> Result<TimeoutOutcome, OrderError> {
        let store = &self.platform.store;
        let order = match store.find_order(order_sn).await? {
            Some(order) => order,
            None => return Ok(TimeoutOutcome::OrderMissing),
        };
        if order.status == OrderStatus::Paid {
            return Ok(TimeoutOutcome::AlreadyPaid);
        }

        // Release before closing. A payment racing us commits first, so
        // whichever settles the reservation first wins.
        let deadline = Deadline::after(self.config.request_timeout());
        let policy = RetryPolicy::new(self.config.lock_retry_attempts);
        match settle(self.inventory.as_ref(), order_sn, Settlement::Release, policy, deadline).await {
            Ok(_) => {}
            Err(e) if e.code == ErrorCode::NotFound => {
                warn!(order_sn, "timed out order has no reservation");
            }
            Err(e) if e.code == ErrorCode::TerminalState => return Ok(TimeoutOutcome::PaymentInFlight),
            Err(e) => return Err(e.into()),
        }

        if order.status == OrderStatus::Closed {
            return Ok(TimeoutOutcome::AlreadyClosed);
        }
        let now = self.platform.clock.now();
        if store
            .transition_order(order_sn, OrderStatus::Pending, OrderStatus::Closed, now)
            .await?
        {
            Ok(TimeoutOutcome::Closed)
        } else {
            Ok(TimeoutOutcome::AlreadyClosed)
        }
    }
}

#[async_trait]
impl<S: OrderStore> MessageHandler for TimeoutHandler<S> {
    fn name(&self) -> &'static str {
        "order_timeout"
    }

    async fn handle(&self, payload: &[u8]) -> ConsumeResult {
        let message: OrderSnMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                error!("Dropping malformed timeout message: {}", e);
                return ConsumeResult::Ack;
            }
        };
        let order_sn = message.order_sn.as_str();

        match self.close_unpaid(order_sn).await {
            Ok(outcome) => {
                info!(order_sn, ?outcome, "order timeout handled");
                ConsumeResult::Ack
            }
            Err(e) if e.is_transient() => {
                warn!(order_sn, error = %e, "order timeout failed, will retry");
                ConsumeResult::RetryLater
            }
            Err(e) => {
                error!(order_sn, error = %e, "order timeout failed permanently");
                ConsumeResult::Ack
            }
        }
    }
}
