use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};

use crate::error::LedgerError;
use crate::ledger::StockLedger;
use crate::store::LedgerStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub released: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Releases reservations left LOCKED well past the payment window. Covers
/// timeout messages that were lost before reaching the order service.
pub struct ReservationSweeper<S> {
    ledger: Arc<StockLedger<S>>,
    grace: chrono::Duration,
    batch_size: i64,
}

impl<S: LedgerStore> ReservationSweeper<S> {
    pub fn new(ledger: Arc<StockLedger<S>>, grace: chrono::Duration) -> Self {
        Self { ledger, grace, batch_size: 100 }
    }

    pub async fn run(&self, interval: Duration) {
        let mut interval = time::interval(interval);

        loop {
            interval.tick().await;

            match self.sweep_once().await {
                Ok(report) if report.released > 0 || report.failed > 0 => {
                    info!(released = report.released, failed = report.failed, "swept expired reservations")
                }
                Ok(_) => {}
                Err(e) => error!("Error sweeping reservations: {}", e),
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, LedgerError> {
        let window = self.ledger.config().payment_window();
        let cutoff = self.ledger.clock().now() - window - self.grace;
        let stale = self.ledger.store().locked_before(cutoff, self.batch_size).await?;

        let mut report = SweepReport::default();
        for order_sn in stale {
            match self.ledger.release(&order_sn).await {
                Ok(outcome) if !outcome.replayed => report.released += 1,
                Ok(_) | Err(LedgerError::TerminalState { .. }) => report.skipped += 1,
                Err(e) => {
                    warn!(order_sn = %order_sn, error = %e, "failed to release expired reservation");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use chrono::Utc;
    use shared::clock::ManualClock;
    use shared::config::CoreConfig;
    use shared::lease::MemoryLease;
    use shared::{JournalStatus, StockLine};

    #[tokio::test]
    async fn only_reservations_past_window_and_grace_are_released() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Arc::new(StockLedger::new(
            MemoryLedgerStore::new(),
            Arc::new(MemoryLease::new()),
            clock.clone(),
            CoreConfig::default(),
        ));
        ledger.store().seed(42, 1, 10).await;
        let sweeper = ReservationSweeper::new(ledger.clone(), chrono::Duration::minutes(10));

        ledger.lock("OLD", &[StockLine::new(42, 1, 2)]).await.unwrap();
        ledger.lock("PAID", &[StockLine::new(42, 1, 1)]).await.unwrap();
        ledger.commit("PAID").await.unwrap();
        clock.advance(chrono::Duration::minutes(35));
        ledger.lock("NEW", &[StockLine::new(42, 1, 3)]).await.unwrap();
        clock.advance(chrono::Duration::minutes(6));

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report, SweepReport { released: 1, skipped: 0, failed: 0 });
        assert_eq!(ledger.store().journal("OLD").await.unwrap().status, JournalStatus::Released);
        assert_eq!(ledger.store().journal("NEW").await.unwrap().status, JournalStatus::Locked);
        assert_eq!(ledger.store().journal("PAID").await.unwrap().status, JournalStatus::Committed);

        let record = ledger.store().stock(42, 1).await.unwrap();
        assert_eq!((record.on_hand, record.locked), (9, 3));

        assert_eq!(sweeper.sweep_once().await.unwrap().released, 0);
    }
}
