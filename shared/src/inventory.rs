//! Request and response bodies of the inventory HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{JournalStatus, StockLine};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRequest {
    pub order_sn: String,
    pub items: Vec<StockLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockResponse {
    pub success: bool,
    pub order_sn: String,
    #[serde(default)]
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettleResponse {
    pub order_sn: String,
    pub status: JournalStatus,
    #[serde(default)]
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetStockRequest {
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockView {
    pub product_id: i64,
    pub warehouse_id: i64,
    pub on_hand: i32,
    pub locked: i32,
    pub available: i32,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationView {
    pub order_sn: String,
    pub status: JournalStatus,
    pub lines: Vec<StockLine>,
    pub locked_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}
