use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

use super::{Broker, BrokerError, OutboundMessage};

#[derive(Clone)]
pub struct KafkaBroker {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaBroker {
    pub fn new(producer: FutureProducer, send_timeout: Duration) -> Self {
        Self { producer, send_timeout }
    }

    pub fn connect(brokers: &str) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(Self::new(producer, Duration::from_secs(5)))
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn send(&self, message: &OutboundMessage) -> Result<(), BrokerError> {
        let json = serde_json::to_string(&message.payload)?;
        let record = FutureRecord::to(&message.topic)
            .payload(&json)
            .key(&message.key);

        self.producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(e, _)| BrokerError::Unavailable(e.to_string()))?;

        Ok(())
    }
}
