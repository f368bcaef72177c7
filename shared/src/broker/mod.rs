mod kafka;
mod memory;

pub use kafka::KafkaBroker;
pub use memory::MemoryBroker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), BrokerError>;
}
