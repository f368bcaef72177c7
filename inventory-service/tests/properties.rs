use inventory_service::store::MemoryLedgerStore;
use inventory_service::{LedgerError, StockLedger};
use proptest::prelude::*;
use shared::clock::SystemClock;
use shared::config::CoreConfig;
use shared::lease::MemoryLease;
use shared::{JournalStatus, StockLine};
use std::collections::HashMap;
use std::sync::Arc;

const SEEDED_PRODUCTS: [i64; 3] = [1, 2, 3];
const INITIAL_ON_HAND: i32 = 8;

#[derive(Debug, Clone)]
enum Op {
    Lock { order: usize, lines: Vec<(i64, i32)> },
    Commit { order: usize },
    Release { order: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..6usize, prop::collection::vec((1..=4i64, 1..=5i32), 1..=3))
            .prop_map(|(order, lines)| Op::Lock { order, lines }),
        1 => (0..6usize).prop_map(|order| Op::Commit { order }),
        1 => (0..6usize).prop_map(|order| Op::Release { order }),
    ]
}

fn order_sn(order: usize) -> String {
    format!("O{}", order)
}

fn config() -> CoreConfig {
    CoreConfig { lease_wait_ms: 10_000, ..CoreConfig::default() }
}

async fn seeded_ledger() -> StockLedger<MemoryLedgerStore> {
    let ledger = StockLedger::new(
        MemoryLedgerStore::new(),
        Arc::new(MemoryLease::new()),
        Arc::new(SystemClock),
        config(),
    );
    for product_id in SEEDED_PRODUCTS {
        ledger.store().seed(product_id, 1, INITIAL_ON_HAND).await;
    }
    ledger
}

async fn apply(ledger: &StockLedger<MemoryLedgerStore>, op: &Op) -> Result<(), LedgerError> {
    match op {
        Op::Lock { order, lines } => {
            let items: Vec<StockLine> = lines.iter().map(|&(p, q)| StockLine::new(p, 1, q)).collect();
            ledger.lock(&order_sn(*order), &items).await.map(|_| ())
        }
        Op::Commit { order } => ledger.commit(&order_sn(*order)).await.map(|_| ()),
        Op::Release { order } => ledger.release(&order_sn(*order)).await.map(|_| ()),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ledger_invariants_hold_under_any_operation_sequence(ops in prop::collection::vec(arb_op(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = seeded_ledger().await;
            let mut seen_status: HashMap<String, JournalStatus> = HashMap::new();
            let mut seen_version: HashMap<i64, i64> = HashMap::new();

            for op in &ops {
                let _ = apply(&ledger, op).await;

                let records = ledger.store().all_stock().await;
                let journals = ledger.store().journals().await;

                for record in &records {
                    prop_assert!(0 <= record.locked && record.locked <= record.on_hand,
                        "bounds broken on {:?} after {:?}", record, op);

                    let previous = seen_version.insert(record.product_id, record.version).unwrap_or(0);
                    prop_assert!(record.version >= previous, "version went backwards after {:?}", op);

                    let locked: i32 = journals.iter()
                        .filter(|j| j.status == JournalStatus::Locked)
                        .flat_map(|j| j.lines.iter())
                        .filter(|l| l.product_id == record.product_id)
                        .map(|l| l.quantity)
                        .sum();
                    let committed: i32 = journals.iter()
                        .filter(|j| j.status == JournalStatus::Committed)
                        .flat_map(|j| j.lines.iter())
                        .filter(|l| l.product_id == record.product_id)
                        .map(|l| l.quantity)
                        .sum();
                    prop_assert_eq!(record.locked, locked);
                    prop_assert_eq!(record.on_hand, INITIAL_ON_HAND - committed);
                }
                prop_assert_eq!(records.len(), SEEDED_PRODUCTS.len());

                for entry in &journals {
                    match seen_status.insert(entry.order_sn.clone(), entry.status) {
                        None => prop_assert_eq!(entry.status, JournalStatus::Locked),
                        Some(previous) => prop_assert!(
                            previous == entry.status || previous.can_transition_to(entry.status),
                            "illegal transition {} -> {} for {}", previous, entry.status, entry.order_sn
                        ),
                    }
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn lock_then_release_is_identity(quantities in prop::collection::vec(1..=8i32, 1..=3)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = seeded_ledger().await;
            let before: Vec<(i32, i32)> = ledger.store().all_stock().await.iter().map(|r| (r.on_hand, r.locked)).collect();

            let items: Vec<StockLine> = quantities.iter().enumerate()
                .map(|(i, &q)| StockLine::new(SEEDED_PRODUCTS[i], 1, q))
                .collect();
            ledger.lock("O1", &items).await.unwrap();
            ledger.release("O1").await.unwrap();

            let after: Vec<(i32, i32)> = ledger.store().all_stock().await.iter().map(|r| (r.on_hand, r.locked)).collect();
            prop_assert_eq!(before, after);
            Ok(())
        })?;
    }

    #[test]
    fn lock_then_commit_moves_exactly_the_locked_amount(quantity in 1..=8i32) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = seeded_ledger().await;
            ledger.lock("O1", &[StockLine::new(1, 1, quantity)]).await.unwrap();
            ledger.commit("O1").await.unwrap();

            let record = ledger.store().stock(1, 1).await.unwrap();
            prop_assert_eq!(record.on_hand, INITIAL_ON_HAND - quantity);
            prop_assert_eq!(record.locked, 0);
            Ok(())
        })?;
    }

    #[test]
    fn repeated_release_equals_single_release(deliveries in 1usize..6) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = seeded_ledger().await;
            ledger.lock("O1", &[StockLine::new(2, 1, 5)]).await.unwrap();
            ledger.release("O1").await.unwrap();
            let once = ledger.store().stock(2, 1).await.unwrap();

            for _ in 0..deliveries {
                let outcome = ledger.release("O1").await.unwrap();
                prop_assert!(outcome.replayed);
            }
            prop_assert_eq!(ledger.store().stock(2, 1).await.unwrap(), once);
            Ok(())
        })?;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_locks_never_oversell() {
    let ledger = Arc::new(StockLedger::new(
        MemoryLedgerStore::new(),
        Arc::new(MemoryLease::new()),
        Arc::new(SystemClock),
        config(),
    ));
    ledger.store().seed(42, 1, 10).await;

    let attempts = 12;
    let quantity = 3;
    let handles: Vec<_> = (0..attempts)
        .map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger.lock(&format!("O{}", i), &[StockLine::new(42, 1, quantity)]).await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut refused = 0;
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientStock(_)) => refused += 1,
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    assert_eq!(succeeded, 10 / quantity);
    assert_eq!(refused, attempts - succeeded);
    let record = ledger.store().stock(42, 1).await.unwrap();
    assert_eq!(record.locked, succeeded * quantity);
    assert_eq!(ledger.store().journals().await.len() as i32, succeeded);
}
