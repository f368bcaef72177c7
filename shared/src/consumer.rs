use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeResult {
    /// Done with the message, commit its offset.
    Ack,
    /// Transient failure, hand the same message back after a pause.
    RetryLater,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, payload: &[u8]) -> ConsumeResult;
}

/// Consumer settings for at-least-once delivery: offsets are committed by
/// hand only after the handler acks.
pub fn consumer_config(brokers: &str, group_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("group.id", group_id)
        .set("bootstrap.servers", brokers)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest");
    config
}

pub async fn run_consumer<H: MessageHandler>(consumer: StreamConsumer, handler: H, retry_backoff: Duration) {
    let mut message_stream = consumer.stream();

    while let Some(message) = message_stream.next().await {
        match message {
            Ok(m) => {
                let payload = m.payload().unwrap_or_default();
                let mut backoff = retry_backoff;
                while handler.handle(payload).await == ConsumeResult::RetryLater {
                    warn!(
                        handler = handler.name(),
                        partition = m.partition(),
                        offset = m.offset(),
                        "handler asked for redelivery, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                }
                if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                    error!("Error committing message: {}", e);
                }
            }
            Err(e) => error!("Error receiving message: {}", e),
        }
    }
}
