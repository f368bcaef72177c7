mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::{PgLedgerStore, PgLedgerTx};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{JournalStatus, StockKey, StoreError};

use crate::models::{JournalEntry, StockRecord};

#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn find_stock(&self, key: StockKey) -> Result<Option<StockRecord>, StoreError>;

    async fn find_journal(&self, order_sn: &str) -> Result<Option<JournalEntry>, StoreError>;

    /// Order numbers of reservations still LOCKED that were taken before
    /// `cutoff`, oldest first.
    async fn locked_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<String>, StoreError>;
}

/// One ledger transaction. Reads through it take row locks; nothing is
/// visible to other transactions until [`LedgerTx::commit`].
#[async_trait]
pub trait LedgerTx: Send {
    async fn lock_stock(&mut self, key: StockKey) -> Result<Option<StockRecord>, StoreError>;

    /// Returns false if a record with the same key already exists.
    async fn insert_stock(&mut self, record: &StockRecord) -> Result<bool, StoreError>;

    /// Writes `next` only if the stored version is still `expected_version`.
    async fn update_stock(&mut self, next: &StockRecord, expected_version: i64) -> Result<bool, StoreError>;

    async fn lock_journal(&mut self, order_sn: &str) -> Result<Option<JournalEntry>, StoreError>;

    /// Returns false if the order already has an entry.
    async fn insert_journal(&mut self, entry: &JournalEntry) -> Result<bool, StoreError>;

    /// Moves the entry from `from` to `to` only if it is still in `from`.
    async fn transition_journal(
        &mut self,
        order_sn: &str,
        from: JournalStatus,
        to: JournalStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
