use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::inventory::{ReservationView, StockView};
use shared::{JournalStatus, StockKey, StockLine, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockRecord {
    pub product_id: i64,
    pub warehouse_id: i64,
    pub on_hand: i32,
    pub locked: i32,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    pub fn new(key: StockKey, on_hand: i32, now: DateTime<Utc>) -> Self {
        Self {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            on_hand,
            locked: 0,
            version: 1,
            updated_at: now,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }

    pub fn available(&self) -> i32 {
        self.on_hand - self.locked
    }

    /// Next version of the record after `delta`, or `None` if the result
    /// would break `0 <= locked <= on_hand`.
    pub fn apply(&self, delta: StockDelta, now: DateTime<Utc>) -> Option<StockRecord> {
        let on_hand = self.on_hand.checked_add(delta.on_hand)?;
        let locked = self.locked.checked_add(delta.locked)?;
        if locked < 0 || locked > on_hand {
            return None;
        }
        Some(StockRecord {
            on_hand,
            locked,
            version: self.version + 1,
            updated_at: now,
            ..*self
        })
    }

    pub fn view(&self) -> StockView {
        StockView {
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            on_hand: self.on_hand,
            locked: self.locked,
            available: self.available(),
            version: self.version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDelta {
    pub on_hand: i32,
    pub locked: i32,
}

impl StockDelta {
    pub fn lock(quantity: i32) -> Self {
        Self { on_hand: 0, locked: quantity }
    }

    pub fn commit(quantity: i32) -> Self {
        Self { on_hand: -quantity, locked: -quantity }
    }

    pub fn release(quantity: i32) -> Self {
        Self { on_hand: 0, locked: -quantity }
    }

    pub fn restock(from: i32, to: i32) -> Self {
        Self { on_hand: to - from, locked: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub order_sn: String,
    pub status: JournalStatus,
    pub lines: Vec<StockLine>,
    pub locked_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl JournalEntry {
    pub fn locked(order_sn: &str, lines: Vec<StockLine>, now: DateTime<Utc>) -> Self {
        Self {
            order_sn: order_sn.to_string(),
            status: JournalStatus::Locked,
            lines,
            locked_at: now,
            settled_at: None,
        }
    }

    pub fn settled(mut self, status: JournalStatus, at: DateTime<Utc>) -> Self {
        self.status = status;
        self.settled_at = Some(at);
        self
    }

    pub fn view(&self) -> ReservationView {
        ReservationView {
            order_sn: self.order_sn.clone(),
            status: self.status,
            lines: self.lines.clone(),
            locked_at: self.locked_at,
            settled_at: self.settled_at,
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct StockRow {
    pub id: i64,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub on_hand: i32,
    pub locked: i32,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::stock_records)]
pub struct NewStockRow {
    pub product_id: i64,
    pub warehouse_id: i64,
    pub on_hand: i32,
    pub locked: i32,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
pub struct JournalRow {
    pub id: i64,
    pub order_sn: String,
    pub status: String,
    pub lines: serde_json::Value,
    pub locked_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::reservation_journal)]
pub struct NewJournalRow {
    pub order_sn: String,
    pub status: String,
    pub lines: serde_json::Value,
    pub locked_at: DateTime<Utc>,
}

impl From<StockRow> for StockRecord {
    fn from(row: StockRow) -> Self {
        Self {
            product_id: row.product_id,
            warehouse_id: row.warehouse_id,
            on_hand: row.on_hand,
            locked: row.locked,
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

impl From<&StockRecord> for NewStockRow {
    fn from(record: &StockRecord) -> Self {
        Self {
            product_id: record.product_id,
            warehouse_id: record.warehouse_id,
            on_hand: record.on_hand,
            locked: record.locked,
            version: record.version,
            updated_at: record.updated_at,
        }
    }
}

impl TryFrom<JournalRow> for JournalEntry {
    type Error = StoreError;

    fn try_from(row: JournalRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JournalStatus>()
            .map_err(|e| StoreError::Corrupt(format!("journal {}: {}", row.order_sn, e)))?;
        let lines: Vec<StockLine> = serde_json::from_value(row.lines)?;

        Ok(Self {
            order_sn: row.order_sn,
            status,
            lines,
            locked_at: row.locked_at,
            settled_at: row.settled_at,
        })
    }
}

impl TryFrom<&JournalEntry> for NewJournalRow {
    type Error = StoreError;

    fn try_from(entry: &JournalEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            order_sn: entry.order_sn.clone(),
            status: entry.status.as_str().to_string(),
            lines: serde_json::to_value(&entry.lines)?,
            locked_at: entry.locked_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(on_hand: i32, locked: i32) -> StockRecord {
        StockRecord {
            product_id: 42,
            warehouse_id: 1,
            on_hand,
            locked,
            version: 3,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn available_is_on_hand_minus_locked() {
        assert_eq!(record(10, 3).available(), 7);
        assert_eq!(record(0, 0).available(), 0);
    }

    #[test]
    fn apply_bumps_version_by_one() {
        let next = record(10, 0).apply(StockDelta::lock(3), Utc::now()).unwrap();
        assert_eq!((next.on_hand, next.locked, next.version), (10, 3, 4));

        let committed = next.apply(StockDelta::commit(3), Utc::now()).unwrap();
        assert_eq!((committed.on_hand, committed.locked, committed.version), (7, 0, 5));
    }

    #[test]
    fn apply_refuses_to_break_bounds() {
        assert!(record(10, 8).apply(StockDelta::lock(3), Utc::now()).is_none());
        assert!(record(10, 1).apply(StockDelta::release(2), Utc::now()).is_none());
        assert!(record(10, 5).apply(StockDelta::restock(10, 4), Utc::now()).is_none());
    }

    #[test]
    fn journal_row_with_unknown_status_is_corrupt() {
        let row = JournalRow {
            id: 1,
            order_sn: "O1".into(),
            status: "SHIPPED".into(),
            lines: serde_json::json!([]),
            locked_at: Utc::now(),
            settled_at: None,
        };
        assert!(matches!(JournalEntry::try_from(row), Err(StoreError::Corrupt(_))));
    }
}
