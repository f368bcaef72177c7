use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ORDER_REBACK_TOPIC: &str = "order_reback";
pub const ORDER_TIMEOUT_TOPIC: &str = "order_timeout";

/// Identity of one stock record. Orders by `(warehouse_id, product_id)`,
/// which is the order every multi-line operation takes row locks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: i64,
    pub warehouse_id: i64,
}

impl StockKey {
    pub fn new(product_id: i64, warehouse_id: i64) -> Self {
        Self { product_id, warehouse_id }
    }
}

impl Ord for StockKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.warehouse_id, self.product_id).cmp(&(other.warehouse_id, other.product_id))
    }
}

impl PartialOrd for StockKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "product {} in warehouse {}", self.product_id, self.warehouse_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: i64,
    pub warehouse_id: i64,
    pub quantity: i32,
}

impl StockLine {
    pub fn new(product_id: i64, warehouse_id: i64, quantity: i32) -> Self {
        Self { product_id, warehouse_id, quantity }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("combined quantity for {0} does not fit in a stock line")]
pub struct QuantityOverflow(pub StockKey);

/// Sorts lines into canonical lock order and merges repeated keys.
pub fn canonicalize(lines: &[StockLine]) -> Result<Vec<StockLine>, QuantityOverflow> {
    let mut merged: BTreeMap<StockKey, i32> = BTreeMap::new();
    for line in lines {
        let quantity = merged.entry(line.key()).or_insert(0);
        *quantity = quantity
            .checked_add(line.quantity)
            .ok_or(QuantityOverflow(line.key()))?;
    }
    Ok(merged
        .into_iter()
        .map(|(key, quantity)| StockLine::new(key.product_id, key.warehouse_id, quantity))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailItem {
    pub product_id: i64,
    pub warehouse_id: i64,
    pub requested: i32,
    pub available: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalStatus {
    Locked,
    Committed,
    Released,
}

impl JournalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalStatus::Locked => "LOCKED",
            JournalStatus::Committed => "COMMITTED",
            JournalStatus::Released => "RELEASED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JournalStatus::Locked)
    }

    pub fn can_transition_to(&self, next: JournalStatus) -> bool {
        matches!(
            (self, next),
            (JournalStatus::Locked, JournalStatus::Committed)
                | (JournalStatus::Locked, JournalStatus::Released)
        )
    }
}

impl fmt::Display for JournalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JournalStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCKED" => Ok(JournalStatus::Locked),
            "COMMITTED" => Ok(JournalStatus::Committed),
            "RELEASED" => Ok(JournalStatus::Released),
            other => Err(ParseStatusError { kind: "journal", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Closed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Closed => "CLOSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "CLOSED" => Ok(OrderStatus::Closed),
            other => Err(ParseStatusError { kind: "order", value: other.to_string() }),
        }
    }
}

/// Payload of both `order_reback` and `order_timeout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnMessage {
    pub order_sn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

/// Timestamp to the microsecond, then the user id, then six random digits.
pub fn generate_order_sn(now: DateTime<Utc>, user_id: i64) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{}{}{:06}", now.format("%Y%m%d%H%M%S%6f"), user_id, suffix)
}
