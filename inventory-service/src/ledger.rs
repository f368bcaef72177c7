use shared::clock::Clock;
use shared::config::CoreConfig;
use shared::lease::{stock_lease_key, KvLease, LeaseGuard, LeaseSet};
use shared::retry::RetryPolicy;
use shared::{canonicalize, FailItem, JournalStatus, StockKey, StockLine};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::journal;
use crate::models::{JournalEntry, StockDelta, StockRecord};
use crate::store::{LedgerStore, LedgerTx};

/// Result of lock, commit or release. `replayed` is set when the call found
/// the work already done and changed nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalOutcome {
    pub entry: JournalEntry,
    pub replayed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Commit,
    Release,
}

impl Settlement {
    fn target(self) -> JournalStatus {
        match self {
            Settlement::Commit => JournalStatus::Committed,
            Settlement::Release => JournalStatus::Released,
        }
    }

    fn delta(self, quantity: i32) -> StockDelta {
        match self {
            Settlement::Commit => StockDelta::commit(quantity),
            Settlement::Release => StockDelta::release(quantity),
        }
    }
}

pub struct StockLedger<S> {
    store: S,
    lease: Arc<dyn KvLease>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl<S: LedgerStore> StockLedger<S> {
    pub fn new(store: S, lease: Arc<dyn KvLease>, clock: Arc<dyn Clock>, config: CoreConfig) -> Self {
        Self { store, lease, clock, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub async fn get_stock(&self, key: StockKey) -> Result<StockRecord, LedgerError> {
        self.store
            .find_stock(key)
            .await?
            .ok_or(LedgerError::StockNotFound(key))
    }

    pub async fn reservation(&self, order_sn: &str) -> Result<JournalEntry, LedgerError> {
        journal::get(&self.store, order_sn).await
    }

    /// Creates the record on first use, otherwise moves `on_hand` to the new
    /// figure. Never lets `on_hand` fall below what is currently locked.
    pub async fn set_stock(&self, key: StockKey, on_hand: i32) -> Result<StockRecord, LedgerError> {
        if on_hand < 0 {
            return Err(LedgerError::Validation(format!("quantity must not be negative, got {}", on_hand)));
        }

        let lease = LeaseGuard::acquire(
            self.lease.clone(),
            stock_lease_key(key.product_id),
            self.config.lease_ttl(),
            self.config.lease_wait(),
        )
        .await?;

        let result = self
            .retry_policy()
            .run(LedgerError::is_retryable, |_| self.try_set_stock(key, on_hand))
            .await;

        if let Err(e) = lease.release().await {
            warn!(%key, error = %e, "failed to release stock lease");
        }
        if let Ok(record) = &result {
            info!(%key, on_hand = record.on_hand, locked = record.locked, version = record.version, "stock set");
        }
        result
    }

    /// Locks every line or none. Lines are merged and put into canonical
    /// order before any row is touched. Every short line is reported, not
    /// just the first.
    pub async fn lock(&self, order_sn: &str, items: &[StockLine]) -> Result<JournalOutcome, LedgerError> {
        validate_order_sn(order_sn)?;
        if items.is_empty() {
            return Err(LedgerError::Validation("items must not be empty".to_string()));
        }
        if let Some(line) = items.iter().find(|l| l.quantity <= 0) {
            return Err(LedgerError::Validation(format!(
                "quantity for {} must be positive, got {}",
                line.key(),
                line.quantity
            )));
        }
        let lines = canonicalize(items).map_err(|e| LedgerError::Validation(e.to_string()))?;

        let leases = LeaseSet::acquire(
            self.lease.clone(),
            lines.iter().map(|l| stock_lease_key(l.product_id)),
            self.config.lease_ttl(),
            self.config.lease_wait(),
        )
        .await?;

        let lines = &lines;
        let result = self
            .retry_policy()
            .run(LedgerError::is_retryable, |_| self.try_lock(order_sn, lines))
            .await;
        leases.release().await;

        match &result {
            Ok(outcome) => info!(
                order_sn,
                lines = lines.len(),
                replayed = outcome.replayed,
                "stock locked"
            ),
            Err(LedgerError::InsufficientStock(items)) => {
                info!(order_sn, short_lines = items.len(), "lock refused, insufficient stock")
            }
            Err(e) => warn!(order_sn, error = %e, "lock failed"),
        }
        result
    }

    /// Turns a reservation into a shipment: `on_hand` and `locked` both drop.
    pub async fn commit(&self, order_sn: &str) -> Result<JournalOutcome, LedgerError> {
        self.settle(order_sn, Settlement::Commit).await
    }

    /// Hands a reservation back: only `locked` drops.
    pub async fn release(&self, order_sn: &str) -> Result<JournalOutcome, LedgerError> {
        self.settle(order_sn, Settlement::Release).await
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.lock_retry_attempts)
    }

    async fn settle(&self, order_sn: &str, settlement: Settlement) -> Result<JournalOutcome, LedgerError> {
        validate_order_sn(order_sn)?;

        let result = self
            .retry_policy()
            .run(LedgerError::is_retryable, |_| self.try_settle(order_sn, settlement))
            .await;

        match &result {
            Ok(outcome) => info!(
                order_sn,
                status = %outcome.entry.status,
                replayed = outcome.replayed,
                "reservation settled"
            ),
            Err(e) => warn!(order_sn, target = %settlement.target(), error = %e, "settlement failed"),
        }
        result
    }

    async fn try_set_stock(&self, key: StockKey, on_hand: i32) -> Result<StockRecord, LedgerError> {
        let mut tx = self.store.begin().await?;
        let result = self.set_stock_in(&mut tx, key, on_hand).await;
        finish(tx, result).await
    }

    async fn set_stock_in(&self, tx: &mut S::Tx, key: StockKey, on_hand: i32) -> Result<StockRecord, LedgerError> {
        let now = self.clock.now();
        let Some(current) = tx.lock_stock(key).await? else {
            let record = StockRecord::new(key, on_hand, now);
            if !tx.insert_stock(&record).await? {
                return Err(LedgerError::ConcurrentUpdate(key.to_string()));
            }
            return Ok(record);
        };

        if on_hand == current.on_hand {
            return Ok(current);
        }
        if on_hand < current.locked {
            return Err(LedgerError::Validation(format!(
                "on_hand {} is below the {} units locked on {}",
                on_hand, current.locked, key
            )));
        }
        let next = current
            .apply(StockDelta::restock(current.on_hand, on_hand), now)
            .ok_or_else(|| LedgerError::Invariant(format!("restock of {} out of bounds", key)))?;
        if !tx.update_stock(&next, current.version).await? {
            return Err(LedgerError::ConcurrentUpdate(key.to_string()));
        }
        Ok(next)
    }

    async fn try_lock(&self, order_sn: &str, lines: &[StockLine]) -> Result<JournalOutcome, LedgerError> {
        let mut tx = self.store.begin().await?;
        let result = self.lock_in(&mut tx, order_sn, lines).await;
        finish(tx, result).await
    }

    async fn lock_in(&self, tx: &mut S::Tx, order_sn: &str, lines: &[StockLine]) -> Result<JournalOutcome, LedgerError> {
        if let Some(existing) = tx.lock_journal(order_sn).await? {
            return replay_lock(existing, lines);
        }

        let now = self.clock.now();
        let mut staged = Vec::with_capacity(lines.len());
        let mut shortfalls = Vec::new();
        for line in lines {
            let key = line.key();
            let record = tx
                .lock_stock(key)
                .await?
                .ok_or(LedgerError::UnknownProduct(key))?;
            if record.available() < line.quantity {
                shortfalls.push(FailItem {
                    product_id: line.product_id,
                    warehouse_id: line.warehouse_id,
                    requested: line.quantity,
                    available: record.available().max(0),
                });
                continue;
            }
            staged.push((record, line.quantity));
        }
        if !shortfalls.is_empty() {
            return Err(LedgerError::InsufficientStock(shortfalls));
        }

        for (record, quantity) in staged {
            let next = record
                .apply(StockDelta::lock(quantity), now)
                .ok_or_else(|| LedgerError::Invariant(format!("lock of {} out of bounds", record.key())))?;
            if !tx.update_stock(&next, record.version).await? {
                return Err(LedgerError::ConcurrentUpdate(record.key().to_string()));
            }
        }

        let entry = journal::create(tx, order_sn, lines.to_vec(), now).await?;
        Ok(JournalOutcome { entry, replayed: false })
    }

    async fn try_settle(&self, order_sn: &str, settlement: Settlement) -> Result<JournalOutcome, LedgerError> {
        let mut tx = self.store.begin().await?;
        let result = self.settle_in(&mut tx, order_sn, settlement).await;
        finish(tx, result).await
    }

    async fn settle_in(
        &self,
        tx: &mut S::Tx,
        order_sn: &str,
        settlement: Settlement,
    ) -> Result<JournalOutcome, LedgerError> {
        let entry = tx
            .lock_journal(order_sn)
            .await?
            .ok_or_else(|| LedgerError::ReservationNotFound(order_sn.to_string()))?;

        let target = settlement.target();
        if entry.status == target {
            return Ok(JournalOutcome { entry, replayed: true });
        }
        if entry.status.is_terminal() {
            return Err(LedgerError::TerminalState {
                order_sn: order_sn.to_string(),
                current: entry.status,
            });
        }

        let now = self.clock.now();
        for line in &entry.lines {
            let key = line.key();
            let record = tx
                .lock_stock(key)
                .await?
                .ok_or(LedgerError::StockNotFound(key))?;
            let next = record.apply(settlement.delta(line.quantity), now).ok_or_else(|| {
                LedgerError::Invariant(format!(
                    "settling {} on {} would leave on_hand {} locked {}",
                    line.quantity, key, record.on_hand, record.locked
                ))
            })?;
            if !tx.update_stock(&next, record.version).await? {
                return Err(LedgerError::ConcurrentUpdate(key.to_string()));
            }
        }

        let entry = journal::transition(tx, entry, target, now).await?;
        Ok(JournalOutcome { entry, replayed: false })
    }
}

fn validate_order_sn(order_sn: &str) -> Result<(), LedgerError> {
    if order_sn.trim().is_empty() {
        return Err(LedgerError::Validation("order_sn must not be empty".to_string()));
    }
    Ok(())
}

/// Same order, same lines: the earlier lock stands. Anything else is a
/// conflict the caller has to resolve with a new order number.
fn replay_lock(existing: JournalEntry, lines: &[StockLine]) -> Result<JournalOutcome, LedgerError> {
    if existing.lines != lines {
        return Err(LedgerError::OrderSnConflict(existing.order_sn));
    }
    match existing.status {
        JournalStatus::Locked | JournalStatus::Committed => Ok(JournalOutcome { entry: existing, replayed: true }),
        JournalStatus::Released => Err(LedgerError::TerminalState {
            order_sn: existing.order_sn,
            current: JournalStatus::Released,
        }),
    }
}

async fn finish<T: LedgerTx, R>(tx: T, result: Result<R, LedgerError>) -> Result<R, LedgerError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}
