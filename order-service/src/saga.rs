//! Order placement.
//!
//! One placement attempt runs in this order:
//!
//! 1. a half message carrying the compensation (`order_reback`) is stored
//!    in PREPARED state, invisible to the dispatcher;
//! 2. the local branch reads the checked cart, prices it, locks stock and
//!    then, in one database transaction, writes the order and its items,
//!    deletes the consumed cart rows, schedules `order_timeout` and
//!    resolves the half message;
//! 3. if anything in the local branch fails after a lock may have
//!    happened, the reservation is released inline and the half message is
//!    made deliverable as a backstop.
//!
//! Half messages nobody resolved are answered later by check-back (see
//! [`check_local_transaction`]).

use bigdecimal::{BigDecimal, RoundingMode};
use serde::{Deserialize, Serialize};
use shared::config::CoreConfig;
use shared::deadline::Deadline;
use shared::lease::{placement_lease_key, LeaseGuard};
use shared::retry::RetryPolicy;
use shared::{
    generate_order_sn, ErrorCode, OrderSnMessage, OrderStatus, ServiceError, StockLine, StoreError,
    ORDER_REBACK_TOPIC, ORDER_TIMEOUT_TOPIC,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clients::{settle, InventoryClient, ProductCatalog, ProductInfo, Settlement};
use crate::error::OrderError;
use crate::models::{CartLine, MessageState, NewOrder, NewOrderItem, OutboxMessage};
use crate::platform::CorePlatform;
use crate::store::{OrderStore, OrderTx};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub user_id: i64,
    pub address: String,
    pub recipient_name: String,
    pub recipient_phone: String,
    #[serde(default)]
    pub post: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub id: i64,
    pub order_sn: String,
    pub order_amount: BigDecimal,
}

/// Outcome of the local branch as the broker sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalDecision {
    Commit,
    Rollback,
}

impl LocalDecision {
    /// Where the compensation half message ends up. A committed placement
    /// never releases its stock; a rolled-back one hands back whatever the
    /// lock may have taken.
    pub fn reback_resolution(self, lock_attempted: bool) -> MessageState {
        match self {
            LocalDecision::Commit => MessageState::Discarded,
            LocalDecision::Rollback if lock_attempted => MessageState::Committed,
            LocalDecision::Rollback => MessageState::Discarded,
        }
    }
}

/// Check-back: the placement committed exactly when its order row exists.
pub async fn check_local_transaction<S: OrderStore>(store: &S, order_sn: &str) -> Result<LocalDecision, StoreError> {
    Ok(match store.find_order(order_sn).await? {
        Some(_) => LocalDecision::Commit,
        None => LocalDecision::Rollback,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    NotAttempted,
    /// The inventory definitely refused; nothing is held.
    Rejected,
    /// Locked, or the call ended without a definite answer.
    MaybeHeld,
}

impl LockState {
    fn after_error(e: &ServiceError) -> Self {
        match e.code {
            ErrorCode::InsufficientStock
            | ErrorCode::UnknownProduct
            | ErrorCode::OrderSnConflict
            | ErrorCode::InvalidArgument
            | ErrorCode::ConcurrentUpdate => LockState::Rejected,
            _ => LockState::MaybeHeld,
        }
    }
}

struct PricedCart {
    amount: BigDecimal,
    items: Vec<NewOrderItem>,
    stock_lines: Vec<StockLine>,
    cart_ids: Vec<i64>,
}

/// Scale of the money columns. Catalog prices are rounded half up to it
/// before they are summed.
const MONEY_SCALE: i64 = 2;

fn to_money(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(MONEY_SCALE, RoundingMode::HalfUp)
}

pub struct OrderSaga<S> {
    platform: CorePlatform<S>,
    catalog: Arc<dyn ProductCatalog>,
    inventory: Arc<dyn InventoryClient>,
    config: CoreConfig,
    default_warehouse_id: i64,
}

impl<S: OrderStore> OrderSaga<S> {
    pub fn new(
        platform: CorePlatform<S>,
        catalog: Arc<dyn ProductCatalog>,
        inventory: Arc<dyn InventoryClient>,
        config: CoreConfig,
        default_warehouse_id: i64,
    ) -> Self {
        Self { platform, catalog, inventory, config, default_warehouse_id }
    }

    pub async fn create_order(&self, request: PlaceOrder) -> Result<PlacedOrder, OrderError> {
        validate(&request)?;
        let deadline = Deadline::after(self.config.request_timeout());

        let lease = LeaseGuard::acquire(
            self.platform.lease.clone(),
            placement_lease_key(request.user_id),
            self.config.lease_ttl(),
            self.config.lease_wait().min(deadline.remaining()),
        )
        .await?;

        let result = self.place(&request, deadline).await;

        if let Err(e) = lease.release().await {
            warn!(user_id = request.user_id, error = %e, "failed to release placement lease");
        }
        result
    }

    async fn place(&self, request: &PlaceOrder, deadline: Deadline) -> Result<PlacedOrder, OrderError> {
        let now = self.platform.clock.now();
        let order_sn = generate_order_sn(now, request.user_id);
        let payload = serde_json::to_value(OrderSnMessage {
            order_sn: order_sn.clone(),
            user_id: Some(request.user_id),
        })
        .map_err(StoreError::from)?;
        let half = OutboxMessage::prepared(&order_sn, ORDER_REBACK_TOPIC, payload, now);

        self.platform
            .store
            .prepare_message(&half)
            .await
            .map_err(|e| OrderError::BrokerUnavailable(format!("half message for {}: {}", order_sn, e)))?;
        debug!(order_sn = %order_sn, "half message prepared");

        let mut lock = LockState::NotAttempted;
        match self.execute_local(request, &order_sn, &half, deadline, &mut lock).await {
            Ok(placed) => {
                info!(
                    order_sn = %placed.order_sn,
                    user_id = request.user_id,
                    amount = %placed.order_amount,
                    "order placed"
                );
                Ok(placed)
            }
            Err(e) => {
                self.roll_back(&order_sn, &half, lock, &e).await;
                Err(e)
            }
        }
    }

    async fn execute_local(
        &self,
        request: &PlaceOrder,
        order_sn: &str,
        half: &OutboxMessage,
        deadline: Deadline,
        lock: &mut LockState,
    ) -> Result<PlacedOrder, OrderError> {
        let store = &self.platform.store;
        let cart = deadline.run(store.checked_cart_lines(request.user_id)).await??;
        if cart.is_empty() {
            return Err(OrderError::EmptyCart(request.user_id));
        }

        let products = self.fetch_products(&cart, deadline).await?;
        let priced = self.price(&cart, &products)?;

        *lock = LockState::MaybeHeld;
        if let Err(e) = self.inventory.lock(order_sn, &priced.stock_lines, deadline).await {
            *lock = LockState::after_error(&e);
            return Err(e.into());
        }
        debug!(order_sn, lines = priced.stock_lines.len(), "stock locked");

        let new_order = NewOrder {
            order_sn: order_sn.to_string(),
            user_id: request.user_id,
            status: OrderStatus::Pending,
            order_amount: priced.amount.clone(),
            address: request.address.clone(),
            recipient_name: request.recipient_name.clone(),
            recipient_phone: request.recipient_phone.clone(),
            post: request.post.clone(),
            created_at: self.platform.clock.now(),
        };

        let mut tx = store.begin().await?;
        let written = deadline
            .run(self.write_order(&mut tx, &new_order, &priced, half))
            .await
            .map_err(OrderError::from)
            .and_then(|r| r);
        let id = match written {
            Ok(id) => id,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(order_sn, error = %rollback_err, "order transaction rollback failed");
                }
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            // The commit may have landed even though we never heard back.
            return match check_local_transaction(store, order_sn).await {
                Ok(LocalDecision::Commit) => {
                    warn!(order_sn, error = %e, "commit reported failure but the order is present");
                    let id = store.find_order(order_sn).await.ok().flatten().map(|o| o.id).unwrap_or(id);
                    Ok(PlacedOrder { id, order_sn: order_sn.to_string(), order_amount: priced.amount })
                }
                _ => Err(e.into()),
            };
        }

        Ok(PlacedOrder { id, order_sn: order_sn.to_string(), order_amount: priced.amount })
    }

    async fn fetch_products(&self, cart: &[CartLine], deadline: Deadline) -> Result<Vec<ProductInfo>, OrderError> {
        let ids: Vec<i64> = cart
            .iter()
            .map(|line| line.product_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let ids = &ids;
        let products = RetryPolicy::new(self.config.lock_retry_attempts)
            .run(
                |e: &ServiceError| e.code.is_transient() && !deadline.is_expired(),
                |_| self.catalog.batch_get_products(ids, deadline),
            )
            .await
            .map_err(OrderError::from_catalog)?;
        Ok(products)
    }

    fn price(&self, cart: &[CartLine], products: &[ProductInfo]) -> Result<PricedCart, OrderError> {
        let by_id: HashMap<i64, &ProductInfo> = products.iter().map(|p| (p.id, p)).collect();
        let mut priced = PricedCart {
            amount: BigDecimal::from(0),
            items: Vec::with_capacity(cart.len()),
            stock_lines: Vec::with_capacity(cart.len()),
            cart_ids: Vec::with_capacity(cart.len()),
        };

        for line in cart {
            let product = by_id
                .get(&line.product_id)
                .ok_or(OrderError::UnknownProduct(line.product_id))?;
            let unit_price = to_money(&product.price);
            priced.amount += &unit_price * BigDecimal::from(line.quantity);
            priced.items.push(NewOrderItem {
                product_id: product.id,
                product_name: product.name.clone(),
                product_image: product.front_image.clone(),
                unit_price,
                quantity: line.quantity,
            });
            priced
                .stock_lines
                .push(StockLine::new(line.product_id, self.default_warehouse_id, line.quantity));
            priced.cart_ids.push(line.id);
        }
        Ok(priced)
    }

    async fn write_order(
        &self,
        tx: &mut S::Tx,
        order: &NewOrder,
        priced: &PricedCart,
        half: &OutboxMessage,
    ) -> Result<i64, OrderError> {
        let id = tx.insert_order(order).await?;
        tx.insert_items(id, &priced.items).await?;

        let deleted = tx.delete_cart_lines(order.user_id, &priced.cart_ids).await?;
        if deleted != priced.cart_ids.len() {
            return Err(OrderError::CartChanged(order.user_id));
        }

        let payload = serde_json::to_value(OrderSnMessage { order_sn: order.order_sn.clone(), user_id: None })
            .map_err(StoreError::from)?;
        let now = self.platform.clock.now();
        let timeout = OutboxMessage::delayed(
            &order.order_sn,
            ORDER_TIMEOUT_TOPIC,
            payload,
            now + self.config.payment_window(),
            now,
        );
        tx.enqueue(&timeout)
            .await
            .map_err(|e| OrderError::BrokerUnavailable(format!("timeout for {}: {}", order.order_sn, e)))?;

        let resolution = LocalDecision::Commit.reback_resolution(true);
        if !tx.resolve_message(half.id, resolution).await? {
            return Err(OrderError::CheckBackResolved(order.order_sn.clone()));
        }
        Ok(id)
    }

    async fn roll_back(&self, order_sn: &str, half: &OutboxMessage, lock: LockState, cause: &OrderError) {
        if cause.code().is_validation() {
            info!(order_sn, error = %cause, "placement rejected");
        } else {
            warn!(order_sn, error = %cause, "placement failed, rolling back");
        }

        let held = lock == LockState::MaybeHeld;
        if held {
            self.compensate(order_sn).await;
        }

        let resolution = LocalDecision::Rollback.reback_resolution(held);
        match self.platform.store.resolve_message(half.id, resolution).await {
            Ok(true) => debug!(order_sn, state = %resolution, "half message resolved"),
            Ok(false) => debug!(order_sn, "half message already resolved"),
            Err(e) => warn!(order_sn, error = %e, "could not resolve half message, leaving it to check-back"),
        }
    }

    /// Releases the reservation a failed placement may hold. Runs on its own
    /// deadline so an exhausted request budget cannot skip it.
    async fn compensate(&self, order_sn: &str) {
        let deadline = Deadline::after(self.config.request_timeout());
        let policy = RetryPolicy::new(self.config.lock_retry_attempts);
        let released = settle(self.inventory.as_ref(), order_sn, Settlement::Release, policy, deadline).await;

        match released {
            Ok(outcome) => info!(order_sn, replayed = outcome.replayed, "compensation released stock"),
            Err(e) if e.code == ErrorCode::NotFound => debug!(order_sn, "nothing was locked"),
            Err(e) if e.code == ErrorCode::TerminalState => {
                error!(order_sn, error = %e, "reservation of a failed placement is already committed")
            }
            Err(e) => warn!(order_sn, error = %e, "compensation failed, order_reback will retry"),
        }
    }
}

fn validate(request: &PlaceOrder) -> Result<(), OrderError> {
    if request.user_id <= 0 {
        return Err(OrderError::Validation("user_id must be positive".to_string()));
    }
    for (field, value) in [
        ("address", &request.address),
        ("recipient_name", &request.recipient_name),
        ("recipient_phone", &request.recipient_phone),
    ] {
        if value.trim().is_empty() {
            return Err(OrderError::Validation(format!("{} is required", field)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryOrderStore;

    #[test]
    fn reback_is_discarded_unless_a_rolled_back_lock_may_hold_stock() {
        assert_eq!(LocalDecision::Commit.reback_resolution(true), MessageState::Discarded);
        assert_eq!(LocalDecision::Rollback.reback_resolution(true), MessageState::Committed);
        assert_eq!(LocalDecision::Rollback.reback_resolution(false), MessageState::Discarded);
    }

    #[test]
    fn catalog_prices_round_half_up_to_cents() {
        let rounded = to_money(&"10.335".parse::<BigDecimal>().unwrap());
        assert_eq!(rounded, "10.34".parse::<BigDecimal>().unwrap());
        assert_eq!(rounded.as_bigint_and_exponent().1, MONEY_SCALE);
        assert_eq!(to_money(&BigDecimal::from(4)).as_bigint_and_exponent().1, MONEY_SCALE);
    }

    #[test]
    fn only_definite_rejections_skip_compensation() {
        for code in [
            ErrorCode::InsufficientStock,
            ErrorCode::UnknownProduct,
            ErrorCode::OrderSnConflict,
            ErrorCode::InvalidArgument,
            ErrorCode::ConcurrentUpdate,
        ] {
            assert_eq!(LockState::after_error(&ServiceError::new(code, "no")), LockState::Rejected);
        }
        for code in [ErrorCode::CollaboratorUnavailable, ErrorCode::Internal, ErrorCode::BrokerUnavailable] {
            assert_eq!(LockState::after_error(&ServiceError::new(code, "?")), LockState::MaybeHeld);
        }
    }

    #[test]
    fn blank_shipping_fields_are_rejected() {
        let request = PlaceOrder {
            user_id: 7,
            address: "1 Main St".into(),
            recipient_name: " ".into(),
            recipient_phone: "555".into(),
            post: String::new(),
        };
        assert!(matches!(validate(&request), Err(OrderError::Validation(_))));
        assert!(matches!(
            validate(&PlaceOrder { user_id: 0, ..request.clone() }),
            Err(OrderError::Validation(_))
        ));
        assert!(validate(&PlaceOrder { recipient_name: "Ann".into(), ..request }).is_ok());
    }

    #[tokio::test]
    async fn check_back_follows_order_presence() {
        let store = MemoryOrderStore::new();
        assert_eq!(check_local_transaction(&store, "X").await.unwrap(), LocalDecision::Rollback);
    }
}
