//! Reservation journal: the one record of what an order has locked.
//!
//! Settlement never looks anywhere else. Cart rows are gone by the time a
//! reservation is committed or released, so the frozen `lines` here are the
//! only answer to "what must be given back".

use chrono::{DateTime, Utc};
use shared::{JournalStatus, StockLine};

use crate::error::LedgerError;
use crate::models::JournalEntry;
use crate::store::{LedgerStore, LedgerTx};

/// Records a fresh LOCKED entry. The lines must already be canonical.
pub async fn create<T: LedgerTx>(
    tx: &mut T,
    order_sn: &str,
    lines: Vec<StockLine>,
    now: DateTime<Utc>,
) -> Result<JournalEntry, LedgerError> {
    let entry = JournalEntry::locked(order_sn, lines, now);
    if !tx.insert_journal(&entry).await? {
        return Err(LedgerError::ConcurrentUpdate(format!("reservation {}", order_sn)));
    }
    Ok(entry)
}

pub async fn get<S: LedgerStore>(store: &S, order_sn: &str) -> Result<JournalEntry, LedgerError> {
    store
        .find_journal(order_sn)
        .await?
        .ok_or_else(|| LedgerError::ReservationNotFound(order_sn.to_string()))
}

/// Conditional move from `from` to `to`. Fails if the entry is no longer in
/// `from`, which is how a second concurrent settlement of the same order
/// finds out it lost.
pub async fn transition<T: LedgerTx>(
    tx: &mut T,
    entry: JournalEntry,
    to: JournalStatus,
    at: DateTime<Utc>,
) -> Result<JournalEntry, LedgerError> {
    let from = entry.status;
    if !from.can_transition_to(to) {
        return Err(LedgerError::Invariant(format!(
            "reservation {} cannot move from {} to {}",
            entry.order_sn, from, to
        )));
    }
    if !tx.transition_journal(&entry.order_sn, from, to, at).await? {
        return Err(LedgerError::ConcurrentUpdate(format!("reservation {}", entry.order_sn)));
    }
    Ok(entry.settled(to, at))
}
