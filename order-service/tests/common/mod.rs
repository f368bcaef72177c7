#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use inventory_service::models::{JournalEntry, StockRecord};
use inventory_service::reback::RebackHandler;
use inventory_service::store::MemoryLedgerStore;
use inventory_service::StockLedger;
use order_service::clients::{InventoryClient, ProductCatalog, ProductInfo};
use order_service::outbox::OutboxDispatcher;
use order_service::store::MemoryOrderStore;
use order_service::timeout::TimeoutHandler;
use order_service::{CorePlatform, OrderSaga, OrderService, PlaceOrder};
use shared::broker::MemoryBroker;
use shared::clock::ManualClock;
use shared::config::CoreConfig;
use shared::consumer::{ConsumeResult, MessageHandler};
use shared::deadline::Deadline;
use shared::inventory::{LockResponse, SettleResponse};
use shared::lease::MemoryLease;
use shared::{ServiceError, StockLine, ORDER_REBACK_TOPIC, ORDER_TIMEOUT_TOPIC};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const USER: i64 = 7;
pub const WAREHOUSE: i64 = 1;

pub fn price(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// The inventory service, called in-process instead of over HTTP.
pub struct LedgerClient {
    pub ledger: Arc<StockLedger<MemoryLedgerStore>>,
    unavailable: AtomicBool,
    lose_lock_reply: AtomicBool,
}

impl LedgerClient {
    pub fn new(ledger: Arc<StockLedger<MemoryLedgerStore>>) -> Self {
        Self { ledger, unavailable: AtomicBool::new(false), lose_lock_reply: AtomicBool::new(false) }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The next lock goes through but its reply never arrives.
    pub fn lose_next_lock_reply(&self) {
        self.lose_lock_reply.store(true, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::unavailable("inventory service down"));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryClient for LedgerClient {
    async fn lock(&self, order_sn: &str, items: &[StockLine], _deadline: Deadline) -> Result<LockResponse, ServiceError> {
        self.check_available()?;
        let outcome = self.ledger.lock(order_sn, items).await?;
        if self.lose_lock_reply.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::unavailable("inventory service timed out"));
        }
        Ok(LockResponse { success: true, order_sn: outcome.entry.order_sn, replayed: outcome.replayed })
    }

    async fn commit(&self, order_sn: &str, _deadline: Deadline) -> Result<SettleResponse, ServiceError> {
        self.check_available()?;
        let outcome = self.ledger.commit(order_sn).await?;
        Ok(SettleResponse { order_sn: outcome.entry.order_sn, status: outcome.entry.status, replayed: outcome.replayed })
    }

    async fn release(&self, order_sn: &str, _deadline: Deadline) -> Result<SettleResponse, ServiceError> {
        self.check_available()?;
        let outcome = self.ledger.release(order_sn).await?;
        Ok(SettleResponse { order_sn: outcome.entry.order_sn, status: outcome.entry.status, replayed: outcome.replayed })
    }
}

#[derive(Default)]
pub struct StaticCatalog {
    products: Mutex<HashMap<i64, ProductInfo>>,
    failures_left: AtomicU32,
}

impl StaticCatalog {
    pub fn add(&self, id: i64, name: &str, unit_price: &str) {
        self.products.lock().unwrap().insert(
            id,
            ProductInfo {
                id,
                name: name.to_string(),
                price: price(unit_price),
                front_image: format!("https://img.example/{}.png", id),
            },
        );
    }

    /// The next `count` calls fail as if the product service were down.
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProductCatalog for StaticCatalog {
    async fn batch_get_products(&self, ids: &[i64], _deadline: Deadline) -> Result<Vec<ProductInfo>, ServiceError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ServiceError::unavailable("product service down"));
        }
        let products = self.products.lock().unwrap();
        Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub broker: Arc<MemoryBroker>,
    pub store: MemoryOrderStore,
    pub ledger: Arc<StockLedger<MemoryLedgerStore>>,
    pub inventory: Arc<LedgerClient>,
    pub catalog: Arc<StaticCatalog>,
    pub config: CoreConfig,
    pub saga: Arc<OrderSaga<MemoryOrderStore>>,
    pub orders: Arc<OrderService<MemoryOrderStore>>,
    pub dispatcher: OutboxDispatcher<MemoryOrderStore>,
    pub timeout: TimeoutHandler<MemoryOrderStore>,
    pub reback: RebackHandler<MemoryLedgerStore>,
}

impl Harness {
    pub fn new() -> Self {
        let config = CoreConfig::default();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let broker = Arc::new(MemoryBroker::new());
        let store = MemoryOrderStore::new();

        let ledger = Arc::new(StockLedger::new(
            MemoryLedgerStore::new(),
            Arc::new(MemoryLease::new()),
            clock.clone(),
            config.clone(),
        ));
        let inventory = Arc::new(LedgerClient::new(ledger.clone()));
        let catalog = Arc::new(StaticCatalog::default());

        let platform = CorePlatform::new(Arc::new(MemoryLease::new()), broker.clone(), store.clone(), clock.clone());
        let saga = Arc::new(OrderSaga::new(
            platform.clone(),
            catalog.clone(),
            inventory.clone(),
            config.clone(),
            WAREHOUSE,
        ));
        let orders = Arc::new(OrderService::new(platform.clone(), inventory.clone(), config.clone()));
        let dispatcher = OutboxDispatcher::new(platform.clone(), config.halfmessage_timeout());
        let timeout = TimeoutHandler::new(platform, inventory.clone(), config.clone());
        let reback = RebackHandler::new(ledger.clone());

        Self { clock, broker, store, ledger, inventory, catalog, config, saga, orders, dispatcher, timeout, reback }
    }

    pub async fn seed(&self, product_id: i64, on_hand: i32) -> StockRecord {
        self.ledger.store().seed(product_id, WAREHOUSE, on_hand).await
    }

    pub async fn stock(&self, product_id: i64) -> StockRecord {
        self.ledger.store().stock(product_id, WAREHOUSE).await.unwrap()
    }

    pub async fn journal(&self, order_sn: &str) -> Option<JournalEntry> {
        self.ledger.store().journal(order_sn).await
    }

    pub fn request(&self) -> PlaceOrder {
        PlaceOrder {
            user_id: USER,
            address: "1 Harbour Road".to_string(),
            recipient_name: "Sam".to_string(),
            recipient_phone: "555-0100".to_string(),
            post: "leave at the door".to_string(),
        }
    }

    pub fn advance_past_payment_window(&self) {
        self.clock.advance(self.config.payment_window());
    }

    /// Publishes whatever the outbox has due and hands every published
    /// message to its consumer. Returns how many were delivered.
    pub async fn pump(&self) -> usize {
        self.dispatcher.dispatch_once().await.unwrap();
        let mut delivered = 0;
        for message in self.broker.drain() {
            let payload = serde_json::to_vec(&message.payload).unwrap();
            let handler: &dyn MessageHandler = match message.topic.as_str() {
                ORDER_TIMEOUT_TOPIC => &self.timeout,
                ORDER_REBACK_TOPIC => &self.reback,
                other => panic!("unexpected topic {}", other),
            };
            assert_eq!(handler.handle(&payload).await, ConsumeResult::Ack);
            delivered += 1;
        }
        delivered
    }
}
