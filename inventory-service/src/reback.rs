use async_trait::async_trait;
use shared::consumer::{ConsumeResult, MessageHandler};
use shared::{JournalStatus, OrderSnMessage};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::LedgerError;
use crate::ledger::StockLedger;
use crate::store::LedgerStore;

/// Consumes `order_reback`: hands back whatever a rolled-back placement
/// managed to lock.
pub struct RebackHandler<S> {
    ledger: Arc<StockLedger<S>>,
}

impl<S: LedgerStore> RebackHandler<S> {
    pub fn new(ledger: Arc<StockLedger<S>>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl<S: LedgerStore> MessageHandler for RebackHandler<S> {
    fn name(&self) -> &'static str {
        "order_reback"
    }

    async fn handle(&self, payload: &[u8]) -> ConsumeResult {
        let message: OrderSnMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                error!("Dropping malformed reback message: {}", e);
                return ConsumeResult::Ack;
            }
        };
        let order_sn = message.order_sn.as_str();

        match self.ledger.release(order_sn).await {
            Ok(outcome) => {
                info!(order_sn, replayed = outcome.replayed, "reback released reservation");
                ConsumeResult::Ack
            }
            Err(LedgerError::ReservationNotFound(_)) => {
                info!(order_sn, "reback found nothing locked");
                ConsumeResult::Ack
            }
            Err(LedgerError::TerminalState { current: JournalStatus::Committed, .. }) => {
                warn!(order_sn, "reback for a committed reservation, leaving it");
                ConsumeResult::Ack
            }
            Err(e) if e.is_transient() => {
                warn!(order_sn, error = %e, "reback failed, will retry");
                ConsumeResult::RetryLater
            }
            Err(e) => {
                error!(order_sn, error = %e, "reback failed permanently");
                ConsumeResult::Ack
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use shared::clock::SystemClock;
    use shared::config::CoreConfig;
    use shared::lease::MemoryLease;
    use shared::StockLine;

    fn handler() -> (RebackHandler<MemoryLedgerStore>, Arc<StockLedger<MemoryLedgerStore>>) {
        let ledger = Arc::new(StockLedger::new(
            MemoryLedgerStore::new(),
            Arc::new(MemoryLease::new()),
            Arc::new(SystemClock),
            CoreConfig::default(),
        ));
        (RebackHandler::new(ledger.clone()), ledger)
    }

    fn payload(order_sn: &str) -> Vec<u8> {
        serde_json::to_vec(&OrderSnMessage { order_sn: order_sn.to_string(), user_id: Some(7) }).unwrap()
    }

    #[tokio::test]
    async fn redelivery_is_harmless() {
        let (handler, ledger) = handler();
        ledger.store().seed(42, 1, 10).await;
        ledger.lock("O1", &[StockLine::new(42, 1, 3)]).await.unwrap();

        for _ in 0..3 {
            assert_eq!(handler.handle(&payload("O1")).await, ConsumeResult::Ack);
        }
        let record = ledger.store().stock(42, 1).await.unwrap();
        assert_eq!((record.on_hand, record.locked, record.version), (10, 0, 3));
        assert_eq!(ledger.store().journal("O1").await.unwrap().status, JournalStatus::Released);
    }

    #[tokio::test]
    async fn nothing_locked_is_acked() {
        let (handler, _) = handler();
        assert_eq!(handler.handle(&payload("never-locked")).await, ConsumeResult::Ack);
    }

    #[tokio::test]
    async fn committed_reservation_is_left_alone() {
        let (handler, ledger) = handler();
        ledger.store().seed(42, 1, 10).await;
        ledger.lock("O1", &[StockLine::new(42, 1, 3)]).await.unwrap();
        ledger.commit("O1").await.unwrap();

        assert_eq!(handler.handle(&payload("O1")).await, ConsumeResult::Ack);
        let record = ledger.store().stock(42, 1).await.unwrap();
        assert_eq!((record.on_hand, record.locked), (7, 0));
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let (handler, _) = handler();
        assert_eq!(handler.handle(b"not json").await, ConsumeResult::Ack);
    }

    #[tokio::test]
    async fn contention_asks_for_redelivery() {
        let (handler, ledger) = handler();
        ledger.store().seed(42, 1, 10).await;
        ledger.lock("O1", &[StockLine::new(42, 1, 3)]).await.unwrap();
        ledger.store().lose_next_updates(10);

        assert_eq!(handler.handle(&payload("O1")).await, ConsumeResult::RetryLater);

        ledger.store().lose_next_updates(0);
        assert_eq!(handler.handle(&payload("O1")).await, ConsumeResult::Ack);
        assert_eq!(ledger.store().stock(42, 1).await.unwrap().locked, 0);
    }
}
