use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::error::OrderError;
use crate::models::OutboxMessage;
use crate::platform::CorePlatform;
use crate::saga::check_local_transaction;
use crate::store::OrderStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub checked_back: usize,
    pub published: usize,
    pub failed: usize,
}

/// Drives the outbox: answers check-back for half messages nobody resolved
/// in time, then publishes whatever is due.
pub struct OutboxDispatcher<S> {
    platform: CorePlatform<S>,
    halfmessage_timeout: chrono::Duration,
    batch_size: i64,
}

impl<S: OrderStore> OutboxDispatcher<S> {
    pub fn new(platform: CorePlatform<S>, halfmessage_timeout: chrono::Duration) -> Self {
        Self { platform, halfmessage_timeout, batch_size: 100 }
    }

    pub async fn run(&self, interval: Duration) {
        let mut interval = time::interval(interval);

        loop {
            interval.tick().await;

            match self.dispatch_once().await {
                Ok(report) if report.failed > 0 => warn!(
                    published = report.published,
                    checked_back = report.checked_back,
                    failed = report.failed,
                    "outbox dispatch had failures"
                ),
                Ok(_) => {}
                Err(e) => error!("Error processing outbox messages: {}", e),
            }
        }
    }

    pub async fn dispatch_once(&self) -> Result<DispatchReport, OrderError> {
        let mut report = DispatchReport::default();
        self.check_back(&mut report).await?;
        self.publish_due(&mut report).await?;
        Ok(report)
    }

    async fn check_back(&self, report: &mut DispatchReport) -> Result<(), OrderError> {
        let store = &self.platform.store;
        let cutoff = self.platform.clock.now() - self.halfmessage_timeout;
        let stale = store.stale_prepared(cutoff, self.batch_size).await?;

        for message in stale {
            let decision = match check_local_transaction(store, &message.order_sn).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(order_sn = %message.order_sn, error = %e, "check-back failed");
                    report.failed += 1;
                    continue;
                }
            };
            // Without the saga's memory, assume a lock may have happened.
            let resolution = decision.reback_resolution(true);
            if store.resolve_message(message.id, resolution).await? {
                info!(order_sn = %message.order_sn, ?decision, state = %resolution, "half message resolved by check-back");
                report.checked_back += 1;
            }
        }
        Ok(())
    }

    async fn publish_due(&self, report: &mut DispatchReport) -> Result<(), OrderError> {
        let store = &self.platform.store;
        let due = store.due_messages(self.platform.clock.now(), self.batch_size).await?;

        for message in due {
            if let Err(e) = self.publish(&message).await {
                error!("Failed to publish outbox message {}: {}", message.id, e);
                report.failed += 1;
                continue;
            }
            store.mark_published(message.id, self.platform.clock.now()).await?;
            debug!(id = %message.id, topic = %message.topic, order_sn = %message.order_sn, "published outbox message");
            report.published += 1;
        }
        Ok(())
    }

    async fn publish(&self, message: &OutboxMessage) -> Result<(), OrderError> {
        self.platform
            .broker
            .send(&message.to_outbound())
            .await
            .map_err(|e| OrderError::BrokerUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageState;
    use crate::store::MemoryOrderStore;
    use chrono::Utc;
    use shared::broker::MemoryBroker;
    use shared::clock::{Clock, ManualClock};
    use shared::lease::MemoryLease;
    use shared::{ORDER_REBACK_TOPIC, ORDER_TIMEOUT_TOPIC};
    use std::sync::Arc;

    fn dispatcher() -> (OutboxDispatcher<MemoryOrderStore>, Arc<ManualClock>, Arc<MemoryBroker>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let broker = Arc::new(MemoryBroker::new());
        let platform = CorePlatform::new(
            Arc::new(MemoryLease::new()),
            broker.clone(),
            MemoryOrderStore::new(),
            clock.clone(),
        );
        (OutboxDispatcher::new(platform, chrono::Duration::seconds(60)), clock, broker)
    }

    #[tokio::test]
    async fn delayed_messages_wait_for_their_time() {
        let (dispatcher, clock, broker) = dispatcher();
        let store = dispatcher.platform.store.clone();
        let now = clock.now();
        let message = OutboxMessage::delayed(
            "O1",
            ORDER_TIMEOUT_TOPIC,
            serde_json::json!({"order_sn": "O1"}),
            now + chrono::Duration::minutes(30),
            now,
        );
        let mut tx = store.begin().await.unwrap();
        crate::store::OrderTx::enqueue(&mut tx, &message).await.unwrap();
        crate::store::OrderTx::commit(tx).await.unwrap();

        assert_eq!(dispatcher.dispatch_once().await.unwrap().published, 0);
        clock.advance(chrono::Duration::minutes(30));
        assert_eq!(dispatcher.dispatch_once().await.unwrap().published, 1);
        assert_eq!(broker.published_to(ORDER_TIMEOUT_TOPIC).len(), 1);
        assert_eq!(dispatcher.dispatch_once().await.unwrap().published, 0);
    }

    #[tokio::test]
    async fn check_back_without_an_order_delivers_the_reback() {
        let (dispatcher, clock, broker) = dispatcher();
        let store = dispatcher.platform.store.clone();
        let half = OutboxMessage::prepared("O9", ORDER_REBACK_TOPIC, serde_json::json!({"order_sn": "O9"}), clock.now());
        store.prepare_message(&half).await.unwrap();

        let report = dispatcher.dispatch_once().await.unwrap();
        assert_eq!(report.checked_back, 0);

        clock.advance(chrono::Duration::seconds(61));
        let report = dispatcher.dispatch_once().await.unwrap();
        assert_eq!(report.checked_back, 1);
        assert_eq!(report.published, 1);
        assert_eq!(broker.published_to(ORDER_REBACK_TOPIC)[0].key, "O9");
        assert_eq!(store.outbox().await[0].state, MessageState::Published);
    }

    #[tokio::test]
    async fn broker_outage_leaves_messages_for_the_next_tick() {
        let (dispatcher, clock, broker) = dispatcher();
        let store = dispatcher.platform.store.clone();
        let now = clock.now();
        let message = OutboxMessage::delayed("O2", ORDER_TIMEOUT_TOPIC, serde_json::json!({"order_sn": "O2"}), now, now);
        let mut tx = store.begin().await.unwrap();
        crate::store::OrderTx::enqueue(&mut tx, &message).await.unwrap();
        crate::store::OrderTx::commit(tx).await.unwrap();

        broker.set_unavailable(true);
        let report = dispatcher.dispatch_once().await.unwrap();
        assert_eq!((report.published, report.failed), (0, 1));

        broker.set_unavailable(false);
        let report = dispatcher.dispatch_once().await.unwrap();
        assert_eq!((report.published, report.failed), (1, 0));
    }
}
