pub mod api;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod models;
pub mod reback;
pub mod schema;
pub mod store;
pub mod sweeper;

pub use error::LedgerError;
pub use ledger::{JournalOutcome, StockLedger};
