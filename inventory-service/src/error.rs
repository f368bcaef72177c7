use shared::lease::LeaseError;
use shared::{ErrorCode, FailItem, JournalStatus, ServiceError, StockKey, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    Validation(String),
    #[error("insufficient stock on {} line(s)", .0.len())]
    InsufficientStock(Vec<FailItem>),
    #[error("no stock record for {0}")]
    UnknownProduct(StockKey),
    #[error("order {0} already holds a reservation with different lines")]
    OrderSnConflict(String),
    #[error("reservation for order {order_sn} is already {current}")]
    TerminalState { order_sn: String, current: JournalStatus },
    #[error("no reservation for order {0}")]
    ReservationNotFound(String),
    #[error("no stock record for {0}")]
    StockNotFound(StockKey),
    #[error("concurrent update on {0}")]
    ConcurrentUpdate(String),
    #[error("lease unavailable: {0}")]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("ledger invariant violated: {0}")]
    Invariant(String),
}

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LedgerError::Validation(_) => ErrorCode::InvalidArgument,
            LedgerError::InsufficientStock(_) => ErrorCode::InsufficientStock,
            LedgerError::UnknownProduct(_) => ErrorCode::UnknownProduct,
            LedgerError::OrderSnConflict(_) => ErrorCode::OrderSnConflict,
            LedgerError::TerminalState { .. } => ErrorCode::TerminalState,
            LedgerError::ReservationNotFound(_) | LedgerError::StockNotFound(_) => ErrorCode::NotFound,
            LedgerError::ConcurrentUpdate(_) | LedgerError::Lease(_) => ErrorCode::ConcurrentUpdate,
            LedgerError::Store(_) | LedgerError::Invariant(_) => ErrorCode::Internal,
        }
    }

    /// Worth another attempt inside the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentUpdate(_))
    }

    /// Worth redelivering the message that caused it.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::ConcurrentUpdate(_) | LedgerError::Lease(_) => true,
            LedgerError::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn to_service_error(&self) -> ServiceError {
        let error = ServiceError::new(self.code(), self.to_string());
        match self {
            LedgerError::InsufficientStock(items) => error.with_fail_items(items.clone()),
            _ => error,
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        e.to_service_error()
    }
}
