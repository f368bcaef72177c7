use shared::deadline::DeadlineExceeded;
use shared::lease::LeaseError;
use shared::{ErrorCode, OrderStatus, ServiceError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid argument: {0}")]
    Validation(String),
    #[error("user {0} has no checked cart lines")]
    EmptyCart(i64),
    #[error("product {0} is unknown to the catalog")]
    UnknownProduct(i64),
    #[error("inventory: {0}")]
    Inventory(ServiceError),
    #[error("catalog: {0}")]
    Catalog(ServiceError),
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("order {0} not found")]
    NotFound(String),
    #[error("order {order_sn} is already {current}")]
    TerminalState { order_sn: String, current: OrderStatus },
    #[error("cart of user {0} changed during placement")]
    CartChanged(i64),
    #[error("placement of {0} was already resolved by check-back")]
    CheckBackResolved(String),
    #[error("placement lease: {0}")]
    Lease(#[from] LeaseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("request deadline exceeded")]
    DeadlineExceeded(#[from] DeadlineExceeded),
}

impl OrderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OrderError::Validation(_) => ErrorCode::InvalidArgument,
            OrderError::EmptyCart(_) => ErrorCode::EmptyCart,
            OrderError::UnknownProduct(_) => ErrorCode::UnknownProduct,
            OrderError::Inventory(e) => e.code,
            OrderError::Catalog(e) => e.code,
            OrderError::CollaboratorUnavailable(_) | OrderError::DeadlineExceeded(_) => {
                ErrorCode::CollaboratorUnavailable
            }
            OrderError::BrokerUnavailable(_) => ErrorCode::BrokerUnavailable,
            OrderError::NotFound(_) => ErrorCode::NotFound,
            OrderError::TerminalState { .. } => ErrorCode::TerminalState,
            OrderError::CartChanged(_) | OrderError::CheckBackResolved(_) => ErrorCode::ConcurrentUpdate,
            OrderError::Lease(LeaseError::Busy { .. }) => ErrorCode::ConcurrentUpdate,
            OrderError::Lease(LeaseError::Store(_)) => ErrorCode::CollaboratorUnavailable,
            OrderError::Store(_) => ErrorCode::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            OrderError::Inventory(e) | OrderError::Catalog(e) => e.code.is_transient(),
            OrderError::Store(e) => e.is_transient(),
            OrderError::CollaboratorUnavailable(_)
            | OrderError::BrokerUnavailable(_)
            | OrderError::Lease(_)
            | OrderError::DeadlineExceeded(_) => true,
            _ => false,
        }
    }

    pub fn to_service_error(&self) -> ServiceError {
        match self {
            // Keep the inventory's own message and fail items.
            OrderError::Inventory(e) => e.clone(),
            other => ServiceError::new(other.code(), other.to_string()),
        }
    }
}

impl OrderError {
    /// Product service failures keep their code but are not blamed on
    /// inventory.
    pub fn from_catalog(e: ServiceError) -> Self {
        match e.code {
            ErrorCode::CollaboratorUnavailable => OrderError::CollaboratorUnavailable(e.message),
            _ => OrderError::Catalog(e),
        }
    }
}

impl From<ServiceError> for OrderError {
    fn from(e: ServiceError) -> Self {
        match e.code {
            ErrorCode::CollaboratorUnavailable => OrderError::CollaboratorUnavailable(e.message),
            _ => OrderError::Inventory(e),
        }
    }
}

impl From<OrderError> for ServiceError {
    fn from(e: OrderError) -> Self {
        e.to_service_error()
    }
}
