use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{JournalStatus, StockKey, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LedgerStore, LedgerTx};
use crate::models::{JournalEntry, StockRecord};

#[derive(Debug, Clone, Default)]
struct LedgerTables {
    stock: BTreeMap<StockKey, StockRecord>,
    journal: HashMap<String, JournalEntry>,
}

/// In-process ledger. Transactions are serialized and work on a staged copy
/// of the tables that replaces the live one on commit.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    tables: Arc<Mutex<LedgerTables>>,
    lost_updates: Arc<AtomicU32>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, product_id: i64, warehouse_id: i64, on_hand: i32) -> StockRecord {
        let key = StockKey::new(product_id, warehouse_id);
        let record = StockRecord::new(key, on_hand, Utc::now());
        self.tables.lock().await.stock.insert(key, record);
        record
    }

    pub async fn stock(&self, product_id: i64, warehouse_id: i64) -> Option<StockRecord> {
        self.tables
            .lock()
            .await
            .stock
            .get(&StockKey::new(product_id, warehouse_id))
            .copied()
    }

    pub async fn all_stock(&self) -> Vec<StockRecord> {
        self.tables.lock().await.stock.values().copied().collect()
    }

    pub async fn journal(&self, order_sn: &str) -> Option<JournalEntry> {
        self.tables.lock().await.journal.get(order_sn).cloned()
    }

    pub async fn journals(&self) -> Vec<JournalEntry> {
        self.tables.lock().await.journal.values().cloned().collect()
    }

    /// Makes the next `count` version-checked writes lose, as if another
    /// writer had slipped in first.
    pub fn lose_next_updates(&self, count: u32) {
        self.lost_updates.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let live = self.tables.clone().lock_owned().await;
        let staged = live.clone();
        Ok(MemoryLedgerTx { live, staged, lost_updates: self.lost_updates.clone() })
    }

    async fn find_stock(&self, key: StockKey) -> Result<Option<StockRecord>, StoreError> {
        Ok(self.tables.lock().await.stock.get(&key).copied())
    }

    async fn find_journal(&self, order_sn: &str) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self.tables.lock().await.journal.get(order_sn).cloned())
    }

    async fn locked_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.lock().await;
        let mut stale: Vec<&JournalEntry> = tables
            .journal
            .values()
            .filter(|e| e.status == JournalStatus::Locked && e.locked_at < cutoff)
            .collect();
        stale.sort_by_key(|e| e.locked_at);
        Ok(stale
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|e| e.order_sn.clone())
            .collect())
    }
}

pub struct MemoryLedgerTx {
    live: OwnedMutexGuard<LedgerTables>,
    staged: LedgerTables,
    lost_updates: Arc<AtomicU32>,
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_stock(&mut self, key: StockKey) -> Result<Option<StockRecord>, StoreError> {
        Ok(self.staged.stock.get(&key).copied())
    }

    async fn insert_stock(&mut self, record: &StockRecord) -> Result<bool, StoreError> {
        if self.staged.stock.contains_key(&record.key()) {
            return Ok(false);
        }
        self.staged.stock.insert(record.key(), *record);
        Ok(true)
    }

    async fn update_stock(&mut self, next: &StockRecord, expected_version: i64) -> Result<bool, StoreError> {
        let lost = self
            .lost_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Ok(false);
        }
        match self.staged.stock.get_mut(&next.key()) {
            Some(current) if current.version == expected_version => {
                *current = *next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_journal(&mut self, order_sn: &str) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self.staged.journal.get(order_sn).cloned())
    }

    async fn insert_journal(&mut self, entry: &JournalEntry) -> Result<bool, StoreError> {
        if self.staged.journal.contains_key(&entry.order_sn) {
            return Ok(false);
        }
        self.staged.journal.insert(entry.order_sn.clone(), entry.clone());
        Ok(true)
    }

    async fn transition_journal(
        &mut self,
        order_sn: &str,
        from: JournalStatus,
        to: JournalStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.staged.journal.get_mut(order_sn) {
            Some(entry) if entry.status == from => {
                entry.status = to;
                entry.settled_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        *self.live = self.staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
