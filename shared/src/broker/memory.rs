use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{Broker, BrokerError, OutboundMessage};

/// Records everything sent so tests can hand it to a consumer.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    published: Mutex<Vec<OutboundMessage>>,
    unavailable: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<OutboundMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    pub fn drain(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.published.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn send(&self, message: &OutboundMessage) -> Result<(), BrokerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("broker marked unavailable".to_string()));
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}
