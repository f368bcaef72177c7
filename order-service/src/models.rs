use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::broker::OutboundMessage;
use shared::{OrderStatus, StoreError};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Queryable, Serialize, Deserialize)]
pub struct CartLine {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: i64,
    pub order_sn: String,
    pub user_id: i64,
    pub status: OrderStatus,
    pub order_amount: BigDecimal,
    pub address: String,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub post: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub order_sn: String,
    pub user_id: i64,
    pub status: OrderStatus,
    pub order_amount: BigDecimal,
    pub address: String,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub post: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_image: String,
    pub unit_price: BigDecimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub product_id: i64,
    pub product_name: String,
    pub product_image: String,
    pub unit_price: BigDecimal,
    pub quantity: i32,
}

/// Lifecycle of an outbox row. A half message starts PREPARED and is
/// resolved exactly once to COMMITTED or DISCARDED. COMMITTED rows become
/// PUBLISHED once the broker has them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageState {
    Prepared,
    Committed,
    Discarded,
    Published,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Prepared => "PREPARED",
            MessageState::Committed => "COMMITTED",
            MessageState::Discarded => "DISCARDED",
            MessageState::Published => "PUBLISHED",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PREPARED" => Ok(MessageState::Prepared),
            "COMMITTED" => Ok(MessageState::Committed),
            "DISCARDED" => Ok(MessageState::Discarded),
            "PUBLISHED" => Ok(MessageState::Published),
            other => Err(StoreError::Corrupt(format!("unknown outbox state {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub order_sn: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub state: MessageState,
    pub deliver_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// A half message: stored, but invisible to the dispatcher until resolved.
    pub fn prepared(order_sn: &str, topic: &str, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_sn: order_sn.to_string(),
            topic: topic.to_string(),
            payload,
            state: MessageState::Prepared,
            deliver_after: now,
            created_at: now,
            published_at: None,
        }
    }

    /// A message the dispatcher publishes once `deliver_after` has passed.
    pub fn delayed(
        order_sn: &str,
        topic: &str,
        payload: serde_json::Value,
        deliver_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: MessageState::Committed,
            deliver_after,
            ..Self::prepared(order_sn, topic, payload, now)
        }
    }

    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            topic: self.topic.clone(),
            key: self.order_sn.clone(),
            payload: self.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, Queryable)]
pub struct OrderRow {
    pub id: i64,
    pub order_sn: String,
    pub user_id: i64,
    pub status: String,
    pub order_amount: BigDecimal,
    pub address: String,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub post: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrderRow {
    pub order_sn: String,
    pub user_id: i64,
    pub status: String,
    pub order_amount: BigDecimal,
    pub address: String,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub post: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
pub struct OrderItemRow {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_image: String,
    pub unit_price: BigDecimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
pub struct NewOrderItemRow {
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_image: String,
    pub unit_price: BigDecimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::outbox_messages)]
pub struct OutboxRow {
    pub id: Uuid,
    pub order_sn: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub state: String,
    pub deliver_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for OrderRecord {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {}", row.order_sn, e)))?;
        Ok(Self {
            id: row.id,
            order_sn: row.order_sn,
            user_id: row.user_id,
            status,
            order_amount: row.order_amount,
            address: row.address,
            recipient_name: row.recipient_name,
            recipient_phone: row.recipient_phone,
            post: row.post,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&NewOrder> for NewOrderRow {
    fn from(order: &NewOrder) -> Self {
        Self {
            order_sn: order.order_sn.clone(),
            user_id: order.user_id,
            status: order.status.as_str().to_string(),
            order_amount: order.order_amount.clone(),
            address: order.address.clone(),
            recipient_name: order.recipient_name.clone(),
            recipient_phone: order.recipient_phone.clone(),
            post: order.post.clone(),
            created_at: order.created_at,
            updated_at: order.created_at,
        }
    }
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            product_name: row.product_name,
            product_image: row.product_image,
            unit_price: row.unit_price,
            quantity: row.quantity,
        }
    }
}

impl NewOrderItemRow {
    pub fn new(order_id: i64, item: &NewOrderItem) -> Self {
        Self {
            order_id,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            product_image: item.product_image.clone(),
            unit_price: item.unit_price.clone(),
            quantity: item.quantity,
        }
    }
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            state: row.state.parse()?,
            order_sn: row.order_sn,
            topic: row.topic,
            payload: row.payload,
            deliver_after: row.deliver_after,
            created_at: row.created_at,
            published_at: row.published_at,
        })
    }
}

impl From<&OutboxMessage> for OutboxRow {
    fn from(message: &OutboxMessage) -> Self {
        Self {
            id: message.id,
            order_sn: message.order_sn.clone(),
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            state: message.state.as_str().to_string(),
            deliver_after: message.deliver_after,
            created_at: message.created_at,
            published_at: message.published_at,
        }
    }
}
